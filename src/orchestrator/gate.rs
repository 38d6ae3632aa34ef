//! Session gate: the worker's view of session validity and limits.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tracing::{debug, info};

use crate::models::session::SessionStatus;
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

/// Store-backed session checks consulted at worker checkpoints.
pub trait SessionGate: Send + Sync {
    /// Whether the session exists and is still active.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the store cannot be queried.
    fn is_active<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Screenshots allowed over the whole session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    fn screenshot_limit<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<u32>>;

    /// Absolute expiry of the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    fn expiry<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<DateTime<Utc>>>;

    /// Screenshots already consumed by earlier batches.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    fn screenshots_used<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<u32>>;

    /// Count one consumed screenshot; returns the new total.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the counter cannot be updated.
    fn record_screenshot<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<u32>>;

    /// Finalize the session. Finalizing an already finished session is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the status update fails.
    fn finalize<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

impl SessionGate for SessionRepo {
    fn is_active<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match self.get_by_id(session_id).await {
                Ok(session) => Ok(session.status == SessionStatus::Active),
                Err(AppError::NotFound(_)) => Ok(false),
                Err(err) => Err(err),
            }
        })
    }

    fn screenshot_limit<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<u32>> {
        Box::pin(async move { Ok(self.get_by_id(session_id).await?.screenshot_limit) })
    }

    fn expiry<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<DateTime<Utc>>> {
        Box::pin(async move { Ok(self.get_by_id(session_id).await?.expires_at) })
    }

    fn screenshots_used<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<u32>> {
        Box::pin(async move { Ok(self.get_by_id(session_id).await?.screenshot_count) })
    }

    fn record_screenshot<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<u32>> {
        Box::pin(self.increment_screenshot_count(session_id))
    }

    fn finalize<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let session = self.get_by_id(session_id).await?;
            if session.status != SessionStatus::Active {
                debug!(session_id, status = session.status.as_str(), "session already finished");
                return Ok(());
            }
            self.update_status(session_id, SessionStatus::Completed).await?;
            info!(session_id, "session finalized; working set ready for export");
            Ok(())
        })
    }
}
