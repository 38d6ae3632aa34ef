//! Preloaded item catalog: the authoritative name vocabulary.
//!
//! The catalog is built once at startup from a bulk snapshot of the
//! marketplace item list and is read-only afterwards. It is keyed by the
//! normalized official display name for the configured language.

pub mod corrector;
pub mod normalize;

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::market::client::MarketClient;
use crate::{AppError, Result};

use normalize::normalize;

/// One catalog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Marketplace identifier (URL slug).
    pub catalog_id: String,
    /// Official display name; the only spelling stored in working sets.
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotItem {
    slug: String,
    #[serde(default)]
    i18n: HashMap<String, SnapshotName>,
}

#[derive(Debug, Deserialize)]
struct SnapshotName {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Wrapped { data: Vec<SnapshotItem> },
    Bare(Vec<SnapshotItem>),
}

/// Normalized name → entry lookup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    by_name: HashMap<String, CatalogEntry>,
}

impl Catalog {
    /// Build a catalog from entries; later duplicates of a key are ignored.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            let key = normalize(&entry.display_name);
            if key.is_empty() || catalog.by_name.contains_key(&key) {
                continue;
            }
            catalog.by_name.insert(key, entry);
        }
        catalog
    }

    /// Parse a snapshot, either a bare item array or the API's `{data: [...]}`.
    ///
    /// Items without a name in `language` are skipped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Catalog` if the JSON does not match either shape.
    pub fn from_snapshot_json(raw: &str, language: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_str(raw)
            .map_err(|err| AppError::Catalog(format!("malformed catalog snapshot: {err}")))?;
        let items = match snapshot {
            Snapshot::Wrapped { data } | Snapshot::Bare(data) => data,
        };

        Ok(Self::from_entries(items.into_iter().filter_map(|item| {
            let name = item.i18n.get(language)?.name.clone()?;
            Some(CatalogEntry {
                catalog_id: item.slug,
                display_name: name,
            })
        })))
    }

    /// Read and parse a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Catalog` if the file is unreadable or malformed.
    pub fn load_from_path(path: impl AsRef<Path>, language: &str) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|err| {
            AppError::Catalog(format!(
                "cannot read {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_snapshot_json(&raw, language)
    }

    /// Load the snapshot file, falling back to the marketplace item list.
    ///
    /// This is a startup precondition: nothing can be corrected or enriched
    /// without a catalog.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Catalog` if neither source yields a non-empty catalog.
    pub async fn load(path: &Path, language: &str, client: &MarketClient) -> Result<Self> {
        let from_file = match Self::load_from_path(path, language) {
            Ok(catalog) if !catalog.is_empty() => {
                info!(path = %path.display(), entries = catalog.len(), "catalog loaded from snapshot");
                return Ok(catalog);
            }
            Ok(_) => AppError::Catalog("snapshot contains no named items".into()),
            Err(err) => err,
        };
        warn!(%from_file, "catalog snapshot unusable, fetching item list from marketplace");

        let raw = client.fetch_catalog().await?;
        let catalog = Self::from_snapshot_json(&raw, language)?;
        if catalog.is_empty() {
            return Err(AppError::Catalog(
                "marketplace item list contains no named items".into(),
            ));
        }
        info!(entries = catalog.len(), "catalog loaded from marketplace");
        Ok(catalog)
    }

    /// Look up an already-normalized key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.by_name.get(key)
    }

    /// Normalize `name` and look it up.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name.get(&normalize(name))
    }

    /// Number of named entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
