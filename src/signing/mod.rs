//! Request signing for both authentication schemes.
//!
//! A [`Signer`] is built once per client for a fixed [`SignatureVersion`] and
//! region. Signing is deterministic: the same descriptor (timestamp included)
//! always produces the same headers or query string.

mod v2;
mod v4;

use std::{sync::Mutex, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use sha2::{Digest as _, Sha256};
use time::OffsetDateTime;

use crate::{
    auth::{Credentials, Region, SignatureVersion},
    error::Error,
    types::PresignedRequest,
    util::url::ResolvedUrl,
};

pub(crate) const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
pub(crate) const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
pub(crate) const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(604_800);
const SERVICE: &str = "s3";

/// Hash placed in `x-amz-content-sha256`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum PayloadHash {
    Empty,
    Sha256(String),
    /// Body is streamed or deliberately left out of the signature.
    Unsigned,
}

impl PayloadHash {
    pub(crate) fn of(body: &Bytes) -> Self {
        if body.is_empty() {
            return Self::Empty;
        }
        Self::Sha256(sha256_hex(body))
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::Empty => EMPTY_PAYLOAD_SHA256,
            Self::Sha256(hash) => hash,
            Self::Unsigned => UNSIGNED_PAYLOAD,
        }
    }
}

/// Everything a scheme needs to sign one request.
pub(crate) struct RequestDescriptor<'a> {
    pub(crate) method: &'a Method,
    pub(crate) resolved: &'a ResolvedUrl,
    pub(crate) payload: &'a PayloadHash,
    pub(crate) now: OffsetDateTime,
}

pub(crate) struct Signer {
    version: SignatureVersion,
    region: Region,
    keys: SigningKeyCache,
}

impl Signer {
    pub(crate) fn new(version: SignatureVersion, region: Region) -> Self {
        Self {
            version,
            region,
            keys: SigningKeyCache::default(),
        }
    }

    pub(crate) fn version(&self) -> SignatureVersion {
        self.version
    }

    pub(crate) fn region(&self) -> &Region {
        &self.region
    }

    /// Adds authentication headers (and `host`) to `headers`.
    pub(crate) fn sign(
        &self,
        credentials: &Credentials,
        request: &RequestDescriptor<'_>,
        headers: &mut HeaderMap,
    ) -> Result<(), Error> {
        match self.version {
            SignatureVersion::V2 => v2::sign_headers(request, headers, credentials),
            SignatureVersion::V4 => {
                let params = v4::SigV4Params::for_s3(&self.region, credentials, request.now);
                v4::sign_headers(request, headers, params, &self.keys)
            }
        }
    }

    /// Builds a presigned URL. `resolved` must already carry the caller's
    /// query parameters.
    pub(crate) fn presign(
        &self,
        credentials: &Credentials,
        method: Method,
        resolved: ResolvedUrl,
        expires_in: Duration,
        headers: &HeaderMap,
        now: OffsetDateTime,
    ) -> Result<PresignedRequest, Error> {
        validate_expiry(expires_in)?;
        match self.version {
            SignatureVersion::V2 => {
                v2::presign(method, resolved, credentials, expires_in, headers, now)
            }
            SignatureVersion::V4 => v4::presign(
                method,
                resolved,
                v4::SigV4Params::for_s3(&self.region, credentials, now),
                expires_in,
                headers,
                &self.keys,
            ),
        }
    }
}

fn validate_expiry(expires_in: Duration) -> Result<(), Error> {
    if expires_in.as_secs() == 0 {
        return Err(Error::invalid_config("presign expires_in must be >= 1 second"));
    }
    if expires_in > MAX_PRESIGN_EXPIRY {
        return Err(Error::invalid_config(
            "presign expires_in must be <= 7 days",
        ));
    }
    Ok(())
}

/// Single-entry cache of the derived V4 key.
///
/// The key only changes with the UTC date, so one slot is enough for a client
/// bound to one region. Derivation is idempotent, so a racing miss just
/// recomputes.
#[derive(Default)]
pub(crate) struct SigningKeyCache {
    entry: Mutex<Option<CachedKey>>,
}

struct CachedKey {
    access_key_id: String,
    date: String,
    region: String,
    service: String,
    key: Vec<u8>,
}

impl SigningKeyCache {
    fn get_or_derive(
        &self,
        credentials: &Credentials,
        date: &str,
        region: &str,
        service: &str,
    ) -> Result<Vec<u8>, Error> {
        {
            let guard = self
                .entry
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(cached) = guard.as_ref()
                && cached.date == date
                && cached.region == region
                && cached.service == service
                && cached.access_key_id == credentials.access_key_id
            {
                return Ok(cached.key.clone());
            }
        }

        let key = v4::derive_signing_key(&credentials.secret_access_key, date, region, service)?;
        let mut guard = self
            .entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(CachedKey {
            access_key_id: credentials.access_key_id.clone(),
            date: date.to_string(),
            region: region.to_string(),
            service: service.to_string(),
            key: key.clone(),
        });
        Ok(key)
    }

    #[cfg(test)]
    fn cached_date(&self) -> Option<String> {
        self.entry
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|c| c.date.clone()))
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub(crate) fn host_header_value(url: &url::Url) -> Result<HeaderValue, Error> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::invalid_config("endpoint must include host"))?;
    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    let host = match (url.port(), default_port) {
        (Some(port), Some(default)) if port != default => format!("{host}:{port}"),
        (Some(port), None) => format!("{host}:{port}"),
        _ => host.to_string(),
    };

    HeaderValue::from_str(&host).map_err(|_| Error::signing("invalid host header value"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
