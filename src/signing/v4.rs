use hmac::{Hmac, Mac as _};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use sha2::Sha256;
use time::OffsetDateTime;

use super::{
    RequestDescriptor, SERVICE, SigningKeyCache, UNSIGNED_PAYLOAD, host_header_value, sha256_hex,
};
use crate::{
    auth::{Credentials, Region},
    error::Error,
    types::PresignedRequest,
    util::{encode::canonical_query_string, url::ResolvedUrl},
};

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Signing identity and instant; everything in the credential scope.
#[derive(Clone, Copy)]
pub(super) struct SigV4Params<'a> {
    region: &'a Region,
    service: &'a str,
    credentials: &'a Credentials,
    now: OffsetDateTime,
}

impl<'a> SigV4Params<'a> {
    pub(super) fn for_s3(
        region: &'a Region,
        credentials: &'a Credentials,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            region,
            service: SERVICE,
            credentials,
            now,
        }
    }

    /// `YYYYMMDD`
    fn date(&self) -> String {
        let now = self.now;
        format!("{:04}{:02}{:02}", now.year(), u8::from(now.month()), now.day())
    }

    /// `YYYYMMDDTHHMMSSZ`
    fn timestamp(&self) -> String {
        let now = self.now;
        format!(
            "{}T{:02}{:02}{:02}Z",
            self.date(),
            now.hour(),
            now.minute(),
            now.second()
        )
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.date(),
            self.region.as_str(),
            self.service
        )
    }

    fn credential(&self) -> String {
        format!("{}/{}", self.credentials.access_key_id, self.scope())
    }

    /// Hex signature over a canonical request.
    fn sign(&self, canonical_request: &str, keys: &SigningKeyCache) -> Result<String, Error> {
        let string_to_sign = format!(
            "{ALGORITHM}\n{}\n{}\n{}",
            self.timestamp(),
            self.scope(),
            sha256_hex(canonical_request.as_bytes())
        );
        let key = keys.get_or_derive(
            self.credentials,
            &self.date(),
            self.region.as_str(),
            self.service,
        )?;
        Ok(hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?))
    }
}

/// The canonical header block and the `;`-joined list of names in it.
struct SignedHeaders {
    canonical: String,
    names: String,
}

impl SignedHeaders {
    fn from_map(headers: &HeaderMap) -> Self {
        let mut entries: Vec<(&str, String)> = headers
            .keys()
            .map(HeaderName::as_str)
            .filter(|name| is_signed(name))
            .filter_map(|name| {
                let values = headers
                    .get_all(name)
                    .iter()
                    .map(|v| v.to_str().ok().map(collapse_whitespace))
                    .collect::<Option<Vec<_>>>()?;
                Some((name, values.join(",")))
            })
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        Self {
            canonical: entries.iter().map(|(n, v)| format!("{n}:{v}\n")).collect(),
            names: entries.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(";"),
        }
    }
}

/// Headers a proxy could rewrite without changing meaning stay unsigned.
fn is_signed(name: &str) -> bool {
    name.starts_with("x-amz-")
        || matches!(
            name,
            "host"
                | "content-type"
                | "content-md5"
                | "range"
                | "if-match"
                | "if-none-match"
                | "if-modified-since"
                | "if-unmodified-since"
        )
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn canonical_request(
    method: &Method,
    resolved: &ResolvedUrl,
    query: &str,
    headers: &SignedHeaders,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{}\n{query}\n{}\n{}\n{payload_hash}",
        resolved.canonical_uri, headers.canonical, headers.names
    )
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) -> Result<(), Error> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| Error::signing(format!("invalid {name} header value")))?;
    headers.insert(name, value);
    Ok(())
}

/// Adds `x-amz-date`, `x-amz-content-sha256`, the session token, `host` and
/// `authorization` to `headers`.
pub(super) fn sign_headers(
    request: &RequestDescriptor<'_>,
    headers: &mut HeaderMap,
    params: SigV4Params<'_>,
    keys: &SigningKeyCache,
) -> Result<(), Error> {
    let payload_hash = request.payload.as_str();
    insert(headers, HeaderName::from_static("x-amz-date"), &params.timestamp())?;
    insert(headers, HeaderName::from_static("x-amz-content-sha256"), payload_hash)?;
    if let Some(token) = &params.credentials.session_token {
        insert(headers, HeaderName::from_static("x-amz-security-token"), token)?;
    }
    headers.insert(http::header::HOST, host_header_value(&request.resolved.url)?);

    let signed = SignedHeaders::from_map(headers);
    let canonical = canonical_request(
        request.method,
        request.resolved,
        &request.resolved.canonical_query_string,
        &signed,
        payload_hash,
    );
    let signature = params.sign(&canonical, keys)?;

    #[cfg(feature = "tracing")]
    tracing::trace!(canonical_request = %canonical, "v4 canonical request");

    let authorization = format!(
        "{ALGORITHM} Credential={}, SignedHeaders={}, Signature={signature}",
        params.credential(),
        signed.names
    );
    insert(headers, http::header::AUTHORIZATION, &authorization)
}

/// Moves authentication into the query string. The payload is never signed
/// and the signature goes last, after the sorted parameters.
pub(super) fn presign(
    method: Method,
    mut resolved: ResolvedUrl,
    params: SigV4Params<'_>,
    expires_in: std::time::Duration,
    headers: &HeaderMap,
    keys: &SigningKeyCache,
) -> Result<PresignedRequest, Error> {
    let mut with_host = headers.clone();
    with_host.insert(http::header::HOST, host_header_value(&resolved.url)?);
    let signed = SignedHeaders::from_map(&with_host);

    let mut query = std::mem::take(&mut resolved.query_params);
    query.extend(
        [
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            ("X-Amz-Credential", params.credential()),
            ("X-Amz-Date", params.timestamp()),
            ("X-Amz-Expires", expires_in.as_secs().to_string()),
            ("X-Amz-SignedHeaders", signed.names.clone()),
        ]
        .map(|(name, value)| (name.to_string(), value)),
    );
    if let Some(token) = &params.credentials.session_token {
        query.push(("X-Amz-Security-Token".to_string(), token.clone()));
    }

    let query = canonical_query_string(&query);
    let canonical = canonical_request(&method, &resolved, &query, &signed, UNSIGNED_PAYLOAD);
    let signature = params.sign(&canonical, keys)?;
    resolved
        .url
        .set_query(Some(&format!("{query}&X-Amz-Signature={signature}")));

    Ok(PresignedRequest {
        method,
        url: resolved.url,
        headers: headers.clone(),
    })
}

/// `AWS4+secret -> date -> region -> service -> aws4_request`.
pub(super) fn derive_signing_key(
    secret_access_key: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, Error> {
    [date, region, service, "aws4_request"].iter().try_fold(
        format!("AWS4{secret_access_key}").into_bytes(),
        |key, step| hmac_sha256(&key, step.as_bytes()),
    )
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| Error::signing("invalid HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
