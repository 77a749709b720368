use std::net::IpAddr;

use url::Url;

use crate::{
    auth::AddressingStyle,
    error::Error,
    util::encode::{aws_percent_encode, aws_percent_encode_path, canonical_query_string},
};

/// A bucket/key pair mapped onto the endpoint, plus the canonical forms
/// both signature schemes need.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedUrl {
    pub(crate) url: Url,
    pub(crate) canonical_uri: String,
    pub(crate) canonical_query_string: String,
    /// `/bucket/key` even for virtual-hosted requests (legacy signing input).
    pub(crate) canonical_resource: String,
    pub(crate) query_params: Vec<(String, String)>,
}

pub(crate) fn resolve_url(
    base_url: &Url,
    bucket: Option<&str>,
    key: Option<&str>,
    query_params: &[(String, String)],
    addressing: AddressingStyle,
) -> Result<ResolvedUrl, Error> {
    let query = canonical_query_string(query_params);
    let mut url = base_url.clone();
    url.set_query((!query.is_empty()).then_some(query.as_str()));

    let key = key.filter(|k| !k.is_empty());
    let (host_prefix, canonical_uri, canonical_resource) = match bucket {
        None => (None, "/".to_string(), "/".to_string()),
        Some(bucket) => {
            let host = base_url
                .host_str()
                .ok_or_else(|| Error::invalid_config("endpoint must include host"))?;
            if effective_style(base_url, host, bucket, addressing) == AddressingStyle::Path {
                let uri = match key {
                    Some(key) => aws_percent_encode_path(&format!("/{bucket}/{key}")),
                    None => aws_percent_encode_path(&format!("/{bucket}")),
                };
                (None, uri.clone(), uri)
            } else {
                if !is_dns_compatible_bucket(bucket) {
                    return Err(Error::invalid_config(
                        "bucket is not DNS compatible for virtual-hosted-style",
                    ));
                }
                let uri = aws_percent_encode_path(&format!("/{}", key.unwrap_or_default()));
                let resource = format!("/{}{uri}", aws_percent_encode(bucket));
                (Some(format!("{bucket}.{host}")), uri, resource)
            }
        }
    };

    url.set_path(&canonical_uri);
    if let Some(host) = host_prefix {
        url.set_host(Some(&host))
            .map_err(|_| Error::invalid_config("invalid endpoint host"))?;
    }

    Ok(ResolvedUrl {
        url,
        canonical_uri,
        canonical_query_string: query,
        canonical_resource,
        query_params: query_params.to_vec(),
    })
}

/// Settles `Auto` to a concrete style. Loopback and IP endpoints, dotted
/// buckets over TLS and names that cannot be a DNS label go path-style.
fn effective_style(
    base_url: &Url,
    host: &str,
    bucket: &str,
    addressing: AddressingStyle,
) -> AddressingStyle {
    if addressing != AddressingStyle::Auto {
        return addressing;
    }
    let plain_host = host == "localhost" || host.parse::<IpAddr>().is_ok();
    let dotted_tls = base_url.scheme() == "https" && bucket.contains('.');
    if plain_host || dotted_tls || !is_dns_compatible_bucket(bucket) {
        AddressingStyle::Path
    } else {
        AddressingStyle::VirtualHosted
    }
}

fn is_dns_compatible_bucket(bucket: &str) -> bool {
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

    (3..=63).contains(&bucket.len())
        && bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && edge_ok(bucket.chars().next())
        && edge_ok(bucket.chars().last())
        && !bucket.contains("..")
        && bucket.parse::<IpAddr>().is_err()
}
