//! Utility functions for safe string handling.

/// Keep at most `max_chars` characters of `s`.
///
/// Returns the kept prefix and how many characters were dropped.
pub fn truncate_chars(s: &str, max_chars: usize) -> (&str, usize) {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => (&s[..cut], s[cut..].chars().count()),
        None => (s, 0),
    }
}
