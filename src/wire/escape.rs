use std::borrow::Cow;

/// Escape `& ' " < >` in user-supplied text.
///
/// Returns the input unchanged (borrowed) when nothing needs escaping.
pub fn escape(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '\'', '"', '<', '>']) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}
