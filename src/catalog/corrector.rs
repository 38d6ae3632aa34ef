//! Maps raw recognized names onto the catalog vocabulary.

use tracing::debug;

use super::normalize::normalize;
use super::{Catalog, CatalogEntry};

/// Lowercase spellings of the in-game blueprint prefix.
const BLUEPRINT_PREFIXES: [&str; 2] = ["чертёж:", "чертеж:"];

/// Suffix the catalog uses for blueprint entries.
const BLUEPRINT_SUFFIX: &str = " (Чертеж)";

/// Rewrite `Blueprint: X` into the catalog's `X (Blueprint)` form.
///
/// The prefix match is case-insensitive; other names pass through trimmed.
#[must_use]
pub fn rewrite_blueprint(raw: &str) -> String {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    for prefix in BLUEPRINT_PREFIXES {
        if lowered.starts_with(prefix) {
            let prefix_chars = prefix.chars().count();
            let rest = trimmed
                .char_indices()
                .nth(prefix_chars)
                .map_or("", |(idx, _)| &trimmed[idx..]);
            return format!("{}{BLUEPRINT_SUFFIX}", rest.trim());
        }
    }
    trimmed.to_owned()
}

/// Resolve a raw name to its catalog entry.
///
/// Exact match on the normalized key only; `None` means the caller records the
/// raw name as unrecognized.
#[must_use]
pub fn correct<'a>(catalog: &'a Catalog, raw: &str) -> Option<&'a CatalogEntry> {
    if raw.trim().is_empty() {
        return None;
    }
    let rewritten = rewrite_blueprint(raw);
    let hit = catalog.get(&normalize(&rewritten));
    if hit.is_none() {
        debug!(raw, rewritten, "no exact catalog match");
    }
    hit
}
