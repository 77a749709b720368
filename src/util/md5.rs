use base64::Engine as _;
use http::HeaderValue;
use md5::{Digest as _, Md5};

use crate::{Result, error::Error};

pub(crate) fn content_md5_header_value(bytes: &[u8]) -> Result<HeaderValue> {
    let digest = Md5::digest(bytes);
    base64_md5_header(&digest)
}

pub(crate) fn md5_digest(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(bytes));
    out
}

pub(crate) fn base64_md5_header(digest: &[u8]) -> Result<HeaderValue> {
    let value = base64::engine::general_purpose::STANDARD.encode(digest);
    HeaderValue::from_str(&value).map_err(|_| Error::invalid_config("invalid Content-MD5 header"))
}

/// Entity tag the service assigns to a completed multipart object:
/// `md5(md5(part1) || md5(part2) || ...)-N`.
pub(crate) fn multipart_etag<'a>(part_md5s: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Md5::new();
    let mut count = 0usize;
    for digest in part_md5s {
        hasher.update(digest);
        count += 1;
    }
    format!("{}-{count}", hex::encode(hasher.finalize()))
}

/// True when an entity tag looks like a plain MD5 hex digest.
pub(crate) fn is_md5_etag(etag: &str) -> bool {
    etag.len() == 32 && etag.bytes().all(|b| b.is_ascii_hexdigit())
}
