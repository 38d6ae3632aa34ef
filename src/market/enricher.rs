//! Market enrichment with a global concurrency cap and retry.
//!
//! One [`MarketEnricher`] is shared by every user's batch run, so its
//! semaphore bounds the simultaneous outstanding marketplace requests for the
//! whole process.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::retry::RetryPolicy;
use crate::{AppError, Result};

use super::{average, MarketplaceClient, PriceInfo};

/// Resolves canonical names to live prices.
pub struct MarketEnricher {
    catalog: Arc<Catalog>,
    client: Arc<dyn MarketplaceClient>,
    limiter: Arc<Semaphore>,
    retry: RetryPolicy,
    item_page_base: String,
}

impl MarketEnricher {
    /// Create an enricher allowing at most `max_concurrent` requests in flight.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        client: Arc<dyn MarketplaceClient>,
        max_concurrent: usize,
        retry: RetryPolicy,
        item_page_base: &str,
    ) -> Self {
        Self {
            catalog,
            client,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            retry,
            item_page_base: item_page_base.trim_end_matches('/').to_owned(),
        }
    }

    /// Look up prices for a canonical name.
    ///
    /// `Ok(None)` when the catalog has no identifier for the name. Rate-limit
    /// and server errors are retried with backoff; the permit is held only
    /// while a request is outstanding.
    ///
    /// # Errors
    ///
    /// Returns the upstream error once retries are exhausted or for any
    /// non-transient failure. Callers treat it as "enrichment unavailable".
    pub async fn enrich(&self, canonical_name: &str) -> Result<Option<PriceInfo>> {
        let Some(entry) = self.catalog.lookup(canonical_name) else {
            info!(name = canonical_name, "no catalog identifier; skipping market lookup");
            return Ok(None);
        };
        let catalog_id = entry.catalog_id.as_str();

        let orders = self
            .retry
            .run("market", || async move {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|err| AppError::Market(format!("market limiter closed: {err}")))?;
                self.client.fetch_top_orders(catalog_id).await
            })
            .await?;

        debug!(
            catalog_id,
            sell = orders.sell.len(),
            buy = orders.buy.len(),
            "market orders fetched"
        );

        Ok(Some(PriceInfo {
            catalog_id: catalog_id.to_owned(),
            avg_sell: average(&orders.sell),
            avg_buy: average(&orders.buy),
            sell_prices: orders.sell,
            buy_prices: orders.buy,
            market_url: format!("{}/{catalog_id}", self.item_page_base),
        }))
    }

    /// Permits currently free; equals the configured cap when idle.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }
}
