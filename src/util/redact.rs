use http::HeaderMap;

const REDACTED: &str = "<redacted>";

/// Keeps the first and last four characters of a long value.
pub(crate) fn redact_value(value: &str) -> String {
    let chars: Vec<char> = value.trim().chars().collect();
    if chars.len() <= 8 {
        return REDACTED.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Renders headers for request tracing with credentials masked.
#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
pub(crate) fn redacted_headers(headers: &HeaderMap) -> String {
    let mut out = headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<binary>");
            let value = match name.as_str() {
                "authorization" => redact_authorization(value),
                "x-amz-security-token" => redact_value(value),
                _ => value.to_string(),
            };
            format!("{}: {value}", name.as_str())
        })
        .collect::<Vec<_>>();
    out.sort();
    out.join("; ")
}

fn redact_authorization(value: &str) -> String {
    match value.rsplit_once("Signature=") {
        Some((head, _)) => format!("{head}Signature=**REDACTED**"),
        None => match value.split_once(':') {
            Some((head, _)) if head.starts_with("AWS ") => format!("{head}:**REDACTED**"),
            _ => REDACTED.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_values_consistently() {
        assert_eq!(redact_value(""), "<redacted>");
        assert_eq!(redact_value("   "), "<redacted>");
        assert_eq!(redact_value("12345678"), "<redacted>");
        assert_eq!(redact_value("123456789"), "1234...6789");
    }

    #[test]
    fn masks_signatures_in_traced_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            "AWS4-HMAC-SHA256 Credential=AK/20130524/us-east-1/s3/aws4_request, SignedHeaders=host, Signature=abcdef"
                .parse()
                .unwrap(),
        );
        headers.insert("x-amz-date", "20130524T000000Z".parse().unwrap());
        let out = redacted_headers(&headers);
        assert!(out.contains("Signature=**REDACTED**"));
        assert!(!out.contains("abcdef"));
        assert!(out.contains("x-amz-date: 20130524T000000Z"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "AWS AKID:c2lnbmF0dXJl".parse().unwrap());
        assert_eq!(
            redacted_headers(&headers),
            "authorization: AWS AKID:**REDACTED**"
        );
    }
}
