//! Name normalization: the sole identity function for item names.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::unwrap_used)] // Literal pattern.
static COLON_SPACING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*:\s*").unwrap());

#[allow(clippy::unwrap_used)] // Literal pattern.
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Fold a raw item name into a comparable key.
///
/// Lowercases, folds `ё` to `е`, puts exactly one space after a colon,
/// collapses whitespace runs and trims. Total and idempotent; empty input
/// yields an empty key. Two names denote the same item iff their keys match.
#[must_use]
pub fn normalize(name: &str) -> String {
    if name.trim().is_empty() {
        return String::new();
    }
    let folded = name.to_lowercase().replace('ё', "е");
    let colons = COLON_SPACING.replace_all(&folded, ": ");
    WHITESPACE_RUN.replace_all(&colons, " ").trim().to_owned()
}
