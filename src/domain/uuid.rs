//! Identifier normalization
//!
//! Transports report service and characteristic identifiers in whatever
//! form their platform prefers: upper or lower case, hyphenated or not,
//! wrapped in braces, sometimes with a trailing C-style terminator. All
//! comparisons in the link go through [`normalize`] so those differences
//! never matter.

/// Canonical form of an identifier string.
///
/// Lower-cases and strips hyphens, braces and embedded NULs. An empty
/// input yields an empty string. Never fails.
pub fn normalize(id: &str) -> String {
    id.chars()
        .filter(|c| !matches!(c, '-' | '{' | '}' | '\0'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Optional-input variant of [`normalize`]; `None` yields the empty string.
pub fn normalize_opt(id: Option<&str>) -> String {
    id.map(normalize).unwrap_or_default()
}

/// Two identifiers denote the same entity iff their canonical forms match.
pub fn same_id(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}
