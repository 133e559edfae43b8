//! Target identity handling for Sumi-Harvest
//!
//! Targets arrive as URLs, `@handles`, or bare names. This module reduces them
//! to the stable identifiers the fetchers and checkpoint files are keyed on.

mod normalize;

pub use normalize::{extract_shortcode, extract_username, post_url};

/// Builds the error-ledger reference for a page of a target
///
/// The first page has an empty cursor and is referenced by the target alone.
pub fn page_reference(target: &str, cursor: &str) -> String {
    if cursor.is_empty() {
        target.to_string()
    } else {
        format!("{}@{}", target, cursor)
    }
}

/// Makes a target safe to embed in a file name
///
/// Characters outside `[A-Za-z0-9._-]` are replaced with `_`.
pub fn file_stem(target: &str) -> String {
    target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
