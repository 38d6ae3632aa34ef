//! Working-set item repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::models::item::{ItemSource, WorkingSetItem};
use crate::orchestrator::ports::WorkingSetStore;
use crate::{AppError, Result};

use super::db::Database;

/// Repository for session working sets.
#[derive(Clone)]
pub struct ItemRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ItemRow {
    session_id: String,
    name: String,
    catalog_id: Option<String>,
    quantity: i64,
    sell_prices: String,
    buy_prices: String,
    avg_sell: f64,
    avg_buy: f64,
    market_url: Option<String>,
    source: String,
}

impl ItemRow {
    fn into_item(self) -> Result<WorkingSetItem> {
        let source = ItemSource::parse(&self.source)
            .ok_or_else(|| AppError::Db(format!("invalid item source: {}", self.source)))?;
        let quantity = u32::try_from(self.quantity)
            .map_err(|_| AppError::Db(format!("quantity out of range: {}", self.quantity)))?;

        Ok(WorkingSetItem {
            session_id: self.session_id,
            name: self.name,
            quantity,
            catalog_id: self.catalog_id,
            sell_prices: serde_json::from_str(&self.sell_prices)?,
            buy_prices: serde_json::from_str(&self.buy_prices)?,
            avg_sell: self.avg_sell,
            avg_buy: self.avg_buy,
            market_url: self.market_url,
            source,
        })
    }
}

impl ItemRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch a session's working set in stored order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<WorkingSetItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            "SELECT session_id, name, catalog_id, quantity, sell_prices, buy_prices,
                    avg_sell, avg_buy, market_url, source
             FROM working_set_item
             WHERE session_id = ?1
             ORDER BY position ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }

    /// Replace a session's working set: delete everything, then bulk insert,
    /// inside one transaction.
    ///
    /// Items must already be consolidated; a duplicate normalized name
    /// violates the unique index and rolls the whole replace back.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if any statement fails; nothing is committed then.
    pub async fn replace_for_session(
        &self,
        session_id: &str,
        items: &[WorkingSetItem],
    ) -> Result<()> {
        let created_at = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM working_set_item WHERE session_id = ?1")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        for (position, item) in items.iter().enumerate() {
            let position = i64::try_from(position)
                .map_err(|_| AppError::Db("working set too large".into()))?;
            sqlx::query(
                "INSERT INTO working_set_item (id, session_id, position, name, normalized_name,
                     catalog_id, quantity, sell_prices, buy_prices, avg_sell, avg_buy,
                     market_url, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(session_id)
            .bind(position)
            .bind(&item.name)
            .bind(item.key())
            .bind(&item.catalog_id)
            .bind(i64::from(item.quantity))
            .bind(serde_json::to_string(&item.sell_prices)?)
            .bind(serde_json::to_string(&item.buy_prices)?)
            .bind(item.avg_sell)
            .bind(item.avg_buy)
            .bind(&item.market_url)
            .bind(item.source.as_str())
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

impl WorkingSetStore for ItemRepo {
    fn get_items<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<WorkingSetItem>>> {
        Box::pin(self.list_for_session(session_id))
    }

    fn replace_items<'a>(
        &'a self,
        session_id: &'a str,
        items: &'a [WorkingSetItem],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.replace_for_session(session_id, items))
    }
}
