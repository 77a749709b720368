//! Legacy HMAC-SHA1 request signing.
//!
//! ```text
//! StringToSign = HTTP-Verb + "\n" +
//!                Content-MD5 + "\n" +
//!                Content-Type + "\n" +
//!                Date + "\n" +
//!                CanonicalizedAmzHeaders +
//!                CanonicalizedResource
//! ```
//!
//! The resource always names the bucket, including for virtual-hosted
//! requests, and carries the sub-resources found in the query string.

use std::{collections::BTreeMap, time::Duration};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac as _};
use http::{HeaderMap, HeaderValue, Method};
use sha1::Sha1;
use time::{OffsetDateTime, UtcOffset, macros::format_description};

use super::{RequestDescriptor, header_str, host_header_value};
use crate::{
    auth::Credentials, error::Error, types::PresignedRequest, util::url::ResolvedUrl,
};

type HmacSha1 = Hmac<Sha1>;

/// Query parameters that are part of the signed resource.
const SUB_RESOURCES: &[&str] = &[
    "acl",
    "cors",
    "delete",
    "lifecycle",
    "location",
    "logging",
    "notification",
    "partNumber",
    "policy",
    "requestPayment",
    "response-cache-control",
    "response-content-disposition",
    "response-content-encoding",
    "response-content-language",
    "response-content-type",
    "response-expires",
    "restore",
    "tagging",
    "torrent",
    "uploadId",
    "uploads",
    "versionId",
    "versioning",
    "versions",
    "website",
];

pub(super) fn sign_headers(
    request: &RequestDescriptor<'_>,
    headers: &mut HeaderMap,
    credentials: &Credentials,
) -> Result<(), Error> {
    let date = HeaderValue::from_str(&http_date(request.now)?)
        .map_err(|_| Error::signing("invalid date header value"))?;
    headers.insert(http::header::DATE, date);
    headers.insert(http::header::HOST, host_header_value(&request.resolved.url)?);

    if let Some(token) = &credentials.session_token {
        let token = HeaderValue::from_str(token)
            .map_err(|_| Error::signing("invalid x-amz-security-token header value"))?;
        headers.insert("x-amz-security-token", token);
    }

    let date_line = if headers.contains_key("x-amz-date") {
        String::new()
    } else {
        header_str(headers, "date").to_string()
    };

    let string_to_sign = string_to_sign(
        request.method,
        headers,
        &date_line,
        &canonical_amz_headers(headers),
        request.resolved,
    );
    let signature = compute_signature(&credentials.secret_access_key, &string_to_sign)?;

    let authorization = format!("AWS {}:{signature}", credentials.access_key_id);
    let value = HeaderValue::from_str(&authorization)
        .map_err(|_| Error::signing("invalid authorization header value"))?;
    headers.insert(http::header::AUTHORIZATION, value);

    Ok(())
}

pub(super) fn presign(
    method: Method,
    resolved: ResolvedUrl,
    credentials: &Credentials,
    expires_in: Duration,
    headers: &HeaderMap,
    now: OffsetDateTime,
) -> Result<PresignedRequest, Error> {
    let mut resolved = resolved;
    let expires = now.unix_timestamp() + expires_in.as_secs() as i64;

    let mut signing_headers = headers.clone();
    if let Some(token) = &credentials.session_token {
        let token = HeaderValue::from_str(token)
            .map_err(|_| Error::signing("invalid x-amz-security-token header value"))?;
        signing_headers.insert("x-amz-security-token", token);
    }

    let string_to_sign = string_to_sign(
        &method,
        &signing_headers,
        &expires.to_string(),
        &canonical_amz_headers(&signing_headers),
        &resolved,
    );
    let signature = compute_signature(&credentials.secret_access_key, &string_to_sign)?;

    let mut query_params = resolved.query_params.clone();
    query_params.push((
        "AWSAccessKeyId".to_string(),
        credentials.access_key_id.clone(),
    ));
    query_params.push(("Expires".to_string(), expires.to_string()));
    if let Some(token) = &credentials.session_token {
        query_params.push(("x-amz-security-token".to_string(), token.clone()));
    }
    query_params.push(("Signature".to_string(), signature));

    let query = crate::util::encode::canonical_query_string(&query_params);
    resolved.url.set_query(Some(&query));

    Ok(PresignedRequest {
        method,
        url: resolved.url,
        headers: headers.clone(),
    })
}

fn string_to_sign(
    method: &Method,
    headers: &HeaderMap,
    date_or_expires: &str,
    amz_headers: &str,
    resolved: &ResolvedUrl,
) -> String {
    let content_md5 = header_str(headers, "content-md5");
    let content_type = header_str(headers, "content-type");
    let resource = canonical_resource(resolved);
    format!("{method}\n{content_md5}\n{content_type}\n{date_or_expires}\n{amz_headers}{resource}")
}

/// Lower-cased, sorted `x-amz-*` headers; repeated values are comma-joined.
fn canonical_amz_headers(headers: &HeaderMap) -> String {
    let mut amz_headers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if !name.starts_with("x-amz-") {
            continue;
        }
        let value = value.to_str().unwrap_or("").trim().to_string();
        amz_headers.entry(name).or_default().push(value);
    }

    let mut out = String::new();
    for (name, values) in &amz_headers {
        out.push_str(name);
        out.push(':');
        out.push_str(&values.join(","));
        out.push('\n');
    }
    out
}

fn canonical_resource(resolved: &ResolvedUrl) -> String {
    let mut sub_params = resolved
        .query_params
        .iter()
        .filter(|(k, _)| SUB_RESOURCES.contains(&k.as_str()))
        .collect::<Vec<_>>();
    if sub_params.is_empty() {
        return resolved.canonical_resource.clone();
    }

    sub_params.sort_by(|a, b| a.0.cmp(&b.0));
    let params = sub_params
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>();
    format!("{}?{}", resolved.canonical_resource, params.join("&"))
}

fn compute_signature(secret_access_key: &str, string_to_sign: &str) -> Result<String, Error> {
    let mut mac = HmacSha1::new_from_slice(secret_access_key.as_bytes())
        .map_err(|_| Error::signing("invalid HMAC key"))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// IMF-fixdate, e.g. `Tue, 27 Mar 2007 19:36:42 GMT`.
pub(crate) fn http_date(now: OffsetDateTime) -> Result<String, Error> {
    let imf_fixdate = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    now.to_offset(UtcOffset::UTC)
        .format(imf_fixdate)
        .map_err(|_| Error::signing("failed to format date header"))
}
