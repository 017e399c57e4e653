//! Message splitting at safe boundaries.

/// Byte index at which to split `text` so the first part fits in `limit`.
///
/// Prefers the position just after the last newline within the window (the
/// newline stays with the first part); otherwise cuts hard at the largest
/// UTF-8 boundary not exceeding `limit`. Always returns an index that makes
/// progress.
#[must_use]
pub fn split_point(text: &str, limit: usize) -> usize {
    if text.len() <= limit {
        return text.len();
    }

    let safe_limit = floor_char_boundary(text, limit);
    let newline_cut = text[..safe_limit]
        .rfind('\n')
        .map(|pos| pos + 1);

    let cut = newline_cut.unwrap_or(safe_limit);
    if cut == 0 {
        // A single character wider than the limit still has to go somewhere.
        text.chars().next().map_or(text.len(), char::len_utf8)
    } else {
        cut
    }
}

/// Split `text` into chunks no longer than `limit` bytes each.
#[must_use]
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while remaining.len() > limit {
        let cut = split_point(remaining, limit);
        chunks.push(remaining[..cut].to_owned());
        remaining = &remaining[cut..];
    }
    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_owned());
    }
    chunks
}

/// Largest byte index `<= max` that is a valid char boundary of `s`.
#[must_use]
pub fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
