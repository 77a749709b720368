//! RFC 3986 percent-encoding as the signing schemes expect it.

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn encode_into(out: &mut String, input: &str, keep_slash: bool) {
    for &byte in input.as_bytes() {
        let plain = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'.' | b'~')
            || (keep_slash && byte == b'/');
        if plain {
            out.push(char::from(byte));
        } else {
            out.push('%');
            out.push(char::from(HEX[usize::from(byte >> 4)]));
            out.push(char::from(HEX[usize::from(byte & 0x0f)]));
        }
    }
}

/// Encodes every byte outside the unreserved set, `/` included.
pub(crate) fn aws_percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    encode_into(&mut out, input, false);
    out
}

/// Like [`aws_percent_encode`] but keeps `/` so object keys stay paths.
pub(crate) fn aws_percent_encode_path(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    encode_into(&mut out, input, true);
    out
}

/// Sorted `name=value` pairs joined by `&`, both sides encoded. Pairs with the
/// same name are ordered by value.
pub(crate) fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(name, value)| (aws_percent_encode(name), aws_percent_encode(value)))
        .collect();
    pairs.sort_unstable();

    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_escape_reserved_bytes() {
        assert_eq!(aws_percent_encode("a+b c"), "a%2Bb%20c");
        assert_eq!(aws_percent_encode("x/y~z"), "x%2Fy~z");
        assert_eq!(aws_percent_encode("é"), "%C3%A9");
    }

    #[test]
    fn object_paths_keep_separators() {
        assert_eq!(aws_percent_encode_path("dir/a b+c.txt"), "dir/a%20b%2Bc.txt");
    }

    #[test]
    fn query_is_sorted_by_name_then_value() {
        let params = [
            ("uploadId", "xyz"),
            ("partNumber", "2"),
            ("prefix", "a b"),
            ("prefix", "a"),
            ("uploads", ""),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));
        assert_eq!(
            canonical_query_string(&params),
            "partNumber=2&prefix=a&prefix=a%20b&uploadId=xyz&uploads="
        );
    }
}
