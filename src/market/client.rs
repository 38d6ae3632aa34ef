//! HTTP client for the marketplace REST API.

use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::config::MarketConfig;
use crate::errors::from_status;
use crate::{AppError, Result};

use super::{MarketplaceClient, TopOrders};

const USER_AGENT: &str = concat!("inventory-intake/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct OrdersEnvelope {
    #[serde(default)]
    data: Option<OrdersData>,
}

#[derive(Debug, Default, Deserialize)]
struct OrdersData {
    #[serde(default)]
    sell: Vec<Order>,
    #[serde(default)]
    buy: Vec<Order>,
}

#[derive(Debug, Deserialize)]
struct Order {
    platinum: f64,
}

/// Thin `reqwest` wrapper carrying the marketplace headers.
#[derive(Debug, Clone)]
pub struct MarketClient {
    http: reqwest::Client,
    api_base: String,
    platform: String,
    language: String,
}

impl MarketClient {
    /// Build a client from config.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Market` if the HTTP client cannot be constructed.
    pub fn new(config: &MarketConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::Market(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            platform: config.platform.clone(),
            language: config.language.clone(),
        })
    }

    /// Download the full item list as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the request fails or the status is not 2xx.
    pub async fn fetch_catalog(&self) -> Result<String> {
        self.get_text(&format!("{}/items", self.api_base)).await
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        debug!(url, "marketplace request");
        let response = self
            .http
            .get(url)
            .header("Platform", &self.platform)
            .header("Language", &self.language)
            .send()
            .await
            .map_err(|err| AppError::Market(format!("marketplace request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::Market(format!("marketplace body read failed: {err}")))?;
        if !status.is_success() {
            return Err(from_status(status, &body, AppError::Market));
        }
        Ok(body)
    }
}

impl MarketplaceClient for MarketClient {
    fn fetch_top_orders<'a>(&'a self, catalog_id: &'a str) -> BoxFuture<'a, Result<TopOrders>> {
        Box::pin(async move {
            let body = self
                .get_text(&format!("{}/orders/item/{catalog_id}/top", self.api_base))
                .await?;
            let envelope: OrdersEnvelope = serde_json::from_str(&body)
                .map_err(|err| AppError::Market(format!("malformed orders payload: {err}")))?;
            let data = envelope.data.unwrap_or_default();
            Ok(TopOrders {
                sell: data.sell.into_iter().map(|order| order.platinum).collect(),
                buy: data.buy.into_iter().map(|order| order.platinum).collect(),
            })
        })
    }
}
