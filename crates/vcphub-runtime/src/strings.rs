//! UTF-8-safe string helpers.

/// Truncate `s` to at most `max_bytes` bytes without splitting a
/// multi-byte character. Returns the input unchanged when it fits.
#[inline]
#[must_use]
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Truncate with a trailing marker naming the dropped byte count.
#[must_use]
pub fn truncate_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    format!(
        "{}... [truncated, {} total bytes]",
        truncate_utf8(s, max_bytes),
        s.len()
    )
}

/// Indent every line of `s` by `spaces` spaces.
#[must_use]
pub fn indent_lines(s: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    s.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
