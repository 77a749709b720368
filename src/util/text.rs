/// Cuts `body` to at most `max_len` bytes on a character boundary and marks
/// the cut with `...`.
pub(crate) fn truncate_snippet(body: &str, max_len: usize) -> String {
    if body.len() <= max_len {
        return body.to_string();
    }
    let cut = (0..=max_len)
        .rev()
        .find(|&i| body.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}...", &body[..cut])
}
