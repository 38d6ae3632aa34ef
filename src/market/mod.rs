//! Marketplace price lookup: HTTP client and the rate-limited enricher.

pub mod client;
pub mod enricher;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Raw top-of-book sample for one item, in marketplace ranking order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopOrders {
    /// Sell order prices.
    pub sell: Vec<f64>,
    /// Buy order prices.
    pub buy: Vec<f64>,
}

/// Price data attached to an enriched item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    /// Marketplace identifier.
    pub catalog_id: String,
    /// Sell prices, not re-sorted.
    pub sell_prices: Vec<f64>,
    /// Buy prices, not re-sorted.
    pub buy_prices: Vec<f64>,
    /// Mean sell price, 0 when there are no sell orders.
    pub avg_sell: f64,
    /// Mean buy price, 0 when there are no buy orders.
    pub avg_buy: f64,
    /// Human-facing item page.
    pub market_url: String,
}

/// Source of live order samples.
///
/// Implementations report HTTP 429 as `AppError::RateLimited` and 5xx as
/// `AppError::Unavailable` so the enricher can retry them.
pub trait MarketplaceClient: Send + Sync {
    /// Fetch the top buy/sell orders for a catalog identifier.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` describing the upstream failure.
    fn fetch_top_orders<'a>(&'a self, catalog_id: &'a str) -> BoxFuture<'a, Result<TopOrders>>;
}

/// Arithmetic mean rounded to two decimals; 0 for an empty sample.
#[must_use]
pub fn average(prices: &[f64]) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)] // Order samples are tiny.
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    (mean * 100.0).round() / 100.0
}
