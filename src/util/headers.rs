use http::{
    HeaderMap,
    header::{AsHeaderName, HeaderName},
};

use crate::error::Error;

fn header_str<N: AsHeaderName>(headers: &HeaderMap, name: N) -> Option<&str> {
    headers.get(name)?.to_str().ok()
}

pub(crate) fn header_string<N: AsHeaderName>(headers: &HeaderMap, name: N) -> Option<String> {
    header_str(headers, name).map(str::to_owned)
}

pub(crate) fn header_u64<N: AsHeaderName>(headers: &HeaderMap, name: N) -> Option<u64> {
    header_str(headers, name)?.trim().parse().ok()
}

/// `x-amz-meta-<key>`, lower-cased.
pub(crate) fn metadata_header_name(key: &str) -> Result<HeaderName, Error> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::invalid_config("metadata key must not be empty"));
    }
    HeaderName::try_from(format!("x-amz-meta-{}", key.to_ascii_lowercase()))
        .map_err(|_| Error::invalid_config("invalid metadata key for x-amz-meta-* header"))
}

/// Parsed `Content-Range: bytes <first>-<last>/<total>` (or `bytes */<total>`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ContentRange {
    pub(crate) range: Option<(u64, u64)>,
    pub(crate) total: Option<u64>,
}

pub(crate) fn content_range(headers: &HeaderMap) -> Option<ContentRange> {
    let value = headers.get(http::header::CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range(value)
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    let range = match range.trim() {
        "*" => None,
        r => {
            let (first, last) = r.split_once('-')?;
            let first = first.trim().parse::<u64>().ok()?;
            let last = last.trim().parse::<u64>().ok()?;
            if last < first {
                return None;
            }
            Some((first, last))
        }
    };
    Some(ContentRange { range, total })
}

/// Strips the quotes the service puts around entity tags.
pub(crate) fn trim_etag(etag: &str) -> &str {
    let etag = etag.trim();
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.trim_matches('"')
}

/// `bytes=<first>-<last>` for an inclusive range.
pub(crate) fn range_header_value(first: u64, last: u64) -> String {
    format!("bytes={first}-{last}")
}
