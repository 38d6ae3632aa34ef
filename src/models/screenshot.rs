//! Pending screenshot reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, fetchable reference to one submitted image.
///
/// Owned by the intake queue from enqueue until the worker pops it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingScreenshot {
    /// Unique identifier used in logs and reports.
    pub id: String,
    /// Handle understood by the configured screenshot source (URL or path).
    pub handle: String,
    /// Arrival timestamp.
    pub received_at: DateTime<Utc>,
}

impl PendingScreenshot {
    /// Wrap a source handle with a generated identifier.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            handle: handle.into(),
            received_at: Utc::now(),
        }
    }
}
