//! Working-set item model.

use serde::{Deserialize, Serialize};

use crate::catalog::normalize::normalize;
use crate::market::PriceInfo;

/// Where an item entered the working set from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    /// Recognized from a screenshot or typed in as a corrected text line.
    Screenshot,
    /// Imported from a previously exported spreadsheet.
    Spreadsheet,
}

impl ItemSource {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screenshot => "screenshot",
            Self::Spreadsheet => "spreadsheet",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "screenshot" => Some(Self::Screenshot),
            "spreadsheet" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

/// One consolidated inventory line of a session.
///
/// The same shape is used for freshly enriched items before they are merged,
/// so an enriched item and its stored counterpart compare field by field.
/// Identity within a session is `normalize(name)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkingSetItem {
    /// Owning session.
    pub session_id: String,
    /// Canonical catalog display name.
    pub name: String,
    /// Accumulated quantity, at least 1.
    pub quantity: u32,
    /// Marketplace identifier, absent when the catalog has no id for it.
    pub catalog_id: Option<String>,
    /// Sell order prices in marketplace ranking order.
    pub sell_prices: Vec<f64>,
    /// Buy order prices in marketplace ranking order.
    pub buy_prices: Vec<f64>,
    /// Mean of `sell_prices`, 0 when empty.
    pub avg_sell: f64,
    /// Mean of `buy_prices`, 0 when empty.
    pub avg_buy: f64,
    /// Item page on the marketplace.
    pub market_url: Option<String>,
    /// Ingestion path.
    pub source: ItemSource,
}

impl WorkingSetItem {
    /// Build an item from a canonical name and an optional price lookup.
    ///
    /// A missing lookup yields zero prices; the item is still kept.
    #[must_use]
    pub fn enriched(
        session_id: &str,
        name: impl Into<String>,
        quantity: u32,
        price: Option<&PriceInfo>,
        source: ItemSource,
    ) -> Self {
        let mut item = Self {
            session_id: session_id.to_owned(),
            name: name.into(),
            quantity: quantity.max(1),
            catalog_id: None,
            sell_prices: Vec::new(),
            buy_prices: Vec::new(),
            avg_sell: 0.0,
            avg_buy: 0.0,
            market_url: None,
            source,
        };
        if let Some(price) = price {
            item.apply_price(price);
        }
        item
    }

    /// Overwrite market-derived fields with a fresh lookup.
    pub fn apply_price(&mut self, price: &PriceInfo) {
        self.catalog_id = Some(price.catalog_id.clone());
        self.sell_prices.clone_from(&price.sell_prices);
        self.buy_prices.clone_from(&price.buy_prices);
        self.avg_sell = price.avg_sell;
        self.avg_buy = price.avg_buy;
        self.market_url = Some(price.market_url.clone());
    }

    /// Merge identity of this item.
    #[must_use]
    pub fn key(&self) -> String {
        normalize(&self.name)
    }
}
