//! Time-based purge of finished sessions and their working sets.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::db::Database;
use crate::Result;

const PURGE_EVERY: Duration = Duration::from_secs(60 * 60);

/// Sessions eligible for removal; `?1` is the RFC3339 cutoff.
const EXPIRED_SESSIONS: &str =
    "SELECT id FROM session WHERE status <> 'active' AND completed_at < ?1";

/// Remove every session finished more than `retention_days` ago.
///
/// Items and sessions are deleted in one transaction, children first.
/// Returns the number of sessions removed.
///
/// # Errors
///
/// `AppError::Db` if either delete fails; nothing is removed in that case.
pub async fn purge(db: &Database, retention_days: u32) -> Result<u64> {
    let cutoff = (Utc::now() - chrono::Duration::days(i64::from(retention_days))).to_rfc3339();

    let mut tx = db.begin().await?;
    let items = sqlx::query(&format!(
        "DELETE FROM working_set_item WHERE session_id IN ({EXPIRED_SESSIONS})"
    ))
    .bind(&cutoff)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    let sessions = sqlx::query(&format!("DELETE FROM session WHERE id IN ({EXPIRED_SESSIONS})"))
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;

    if sessions > 0 {
        info!(retention_days, sessions, items, "purged finished sessions");
    } else {
        debug!(retention_days, "nothing to purge");
    }
    Ok(sessions)
}

/// Run [`purge`] hourly until `cancel` fires.
///
/// The first purge happens immediately.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(PURGE_EVERY);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticks.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        warn!(%err, "retention purge failed");
                    }
                }
            }
        }
        debug!("retention task stopped");
    })
}
