//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::session::{Session, SessionKind, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    owner_user_id: String,
    kind: String,
    status: String,
    screenshot_limit: i64,
    screenshot_count: i64,
    created_at: String,
    expires_at: String,
    completed_at: Option<String>,
}

const SESSION_COLUMNS: &str = "id, owner_user_id, kind, status, screenshot_limit, \
     screenshot_count, created_at, expires_at, completed_at";

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let kind = SessionKind::parse(&self.kind)
            .ok_or_else(|| AppError::Db(format!("invalid session kind: {}", self.kind)))?;
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| AppError::Db(format!("invalid session status: {}", self.status)))?;

        Ok(Session {
            id: self.id,
            owner_user_id: self.owner_user_id,
            kind,
            status,
            screenshot_limit: to_u32(self.screenshot_limit, "screenshot_limit")?,
            screenshot_count: to_u32(self.screenshot_count, "screenshot_count")?,
            created_at: parse_ts(&self.created_at, "created_at")?,
            expires_at: parse_ts(&self.expires_at, "expires_at")?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|raw| parse_ts(raw, "completed_at"))
                .transpose()?,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn to_u32(raw: i64, field: &str) -> Result<u32> {
    u32::try_from(raw).map_err(|_| AppError::Db(format!("{field} out of range: {raw}")))
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            "INSERT INTO session (id, owner_user_id, kind, status, screenshot_limit,
                 screenshot_count, created_at, expires_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&session.id)
        .bind(&session.owner_user_id)
        .bind(session.kind.as_str())
        .bind(session.status.as_str())
        .bind(i64::from(session.screenshot_limit))
        .bind(i64::from(session.screenshot_count))
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.completed_at.map(|ts| ts.to_rfc3339()))
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.ok_or_else(|| AppError::NotFound("session not found".into()))?
            .into_session()
    }

    /// The user's active session, if any (most recent first).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_active_for_user(&self, owner_user_id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM session
             WHERE owner_user_id = ?1 AND status = 'active'
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(owner_user_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Move a session out of `Active`, stamping `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transition is invalid or persistence fails.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        let mut current = self.get_by_id(id).await?;
        if !current.can_transition_to(status) {
            return Err(AppError::Db(format!(
                "invalid session status transition {} -> {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        let now = Utc::now();
        sqlx::query("UPDATE session SET status = ?1, completed_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        current.status = status;
        current.completed_at = Some(now);
        Ok(current)
    }

    /// Count one more consumed screenshot and return the new total.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn increment_screenshot_count(&self, id: &str) -> Result<u32> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE session SET screenshot_count = screenshot_count + 1
             WHERE id = ?1 RETURNING screenshot_count",
        )
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;

        let count = count.ok_or_else(|| AppError::NotFound("session not found".into()))?;
        to_u32(count, "screenshot_count")
    }

    /// List all active sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_active(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE status = 'active' ORDER BY created_at ASC"
        ))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
