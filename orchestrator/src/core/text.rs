//! Character-budget helpers for text that ends up in prompts.

const ELLIPSIS: char = '…';

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `value` to at most `max` characters, ending in `…` when shortened.
pub fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = value.chars().take(max - 1).collect();
    out.push(ELLIPSIS);
    out
}

/// Single-line form of `value`, bounded to `max` characters.
pub fn compact_text(value: &str, max: usize) -> String {
    truncate_chars(&collapse_whitespace(value), max)
}
