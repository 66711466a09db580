//! Markup escaping for user-supplied chat text.

/// Escape angle brackets so stored text cannot inject markup.
///
/// Only `<` and `>` are rewritten. Ampersands are left alone, which makes
/// the function idempotent: already-escaped text passes through unchanged.
pub fn sanitize_text(raw: &str) -> String {
    if !raw.contains(['<', '>']) {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
