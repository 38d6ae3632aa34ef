//! Image recognition contract.

pub mod gemini;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::Result;

/// One recognized inventory line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLine {
    /// Name as printed on the screenshot.
    pub name: String,
    /// Stack size, at least 1.
    pub quantity: u32,
}

impl ExtractedLine {
    /// Build a line, clamping the quantity to at least 1.
    #[must_use]
    pub fn new(name: impl Into<String>, quantity: u32) -> Self {
        Self {
            name: name.into(),
            quantity: quantity.max(1),
        }
    }
}

/// Extracts inventory lines from image bytes.
///
/// An empty list is a valid "nothing found" answer; an error is a per-screenshot
/// failure.
pub trait Recognizer: Send + Sync {
    /// Recognize item names and quantities on one image.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the service fails or answers garbage.
    fn recognize(&self, image: Bytes) -> BoxFuture<'_, Result<Vec<ExtractedLine>>>;
}

/// Raw line as answered by a model; every field may be missing.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLine {
    /// Item name.
    #[serde(default)]
    pub name: Option<String>,
    /// Quantity, possibly fractional or non-positive.
    #[serde(default)]
    pub quantity: Option<f64>,
}

/// Apply the recognition contract to raw model output.
///
/// Blank names are dropped; missing or < 1 quantities become 1.
#[must_use]
pub fn sanitize(raw: Vec<RawLine>) -> Vec<ExtractedLine> {
    raw.into_iter()
        .filter_map(|line| {
            let name = line.name?.trim().to_owned();
            if name.is_empty() {
                return None;
            }
            let quantity = match line.quantity {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped range.
                Some(q) if q.is_finite() && q >= 1.0 => q.min(f64::from(u32::MAX)).floor() as u32,
                _ => 1,
            };
            Some(ExtractedLine::new(name, quantity))
        })
        .collect()
}
