//! Session lifecycle management: start, complete, cancel.
//!
//! A user has at most one active session. Starting a new one cancels the
//! previous session together with its queued screenshots.

use chrono::Duration;
use tracing::{info, info_span, Instrument};

use crate::config::IntakeConfig;
use crate::models::session::{Session, SessionKind, SessionStatus};
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

use super::intake::BatchIntake;

/// Open a new session for `user_id`, cancelling any active one.
///
/// # Errors
///
/// Returns `AppError::Db` if the previous session cannot be cancelled or the
/// new one cannot be stored.
pub async fn start_session(
    user_id: &str,
    kind: SessionKind,
    config: &IntakeConfig,
    session_repo: &SessionRepo,
    intake: &BatchIntake,
) -> Result<Session> {
    async move {
        if let Some(previous) = session_repo.find_active_for_user(user_id).await? {
            let discarded = intake.cancel(user_id);
            session_repo
                .update_status(&previous.id, SessionStatus::Cancelled)
                .await?;
            info!(previous_session = %previous.id, discarded, "previous session cancelled");
        }

        let session = Session::new(
            user_id.to_owned(),
            kind,
            kind.screenshot_limit(config.screenshot_limit),
            Duration::minutes(i64::from(config.session_ttl_minutes)),
        );
        let session = session_repo.create(&session).await?;
        info!(session_id = %session.id, kind = kind.as_str(), limit = session.screenshot_limit, "session started");
        Ok(session)
    }
    .instrument(info_span!("start_session", user_id))
    .await
}

/// Mark a session completed.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the session is unknown or owned by
/// someone else, and `AppError::Db` if the transition is invalid.
pub async fn complete_session(
    session_id: &str,
    user_id: &str,
    session_repo: &SessionRepo,
) -> Result<Session> {
    async move {
        resolve_session(Some(session_id), user_id, session_repo).await?;
        let session = session_repo
            .update_status(session_id, SessionStatus::Completed)
            .await?;
        info!("session completed");
        Ok(session)
    }
    .instrument(info_span!("complete_session", session_id, user_id))
    .await
}

/// Cancel a session and discard the user's queued screenshots.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the session is unknown or owned by
/// someone else, and `AppError::Db` if the transition is invalid.
pub async fn cancel_session(
    session_id: &str,
    user_id: &str,
    session_repo: &SessionRepo,
    intake: &BatchIntake,
) -> Result<Session> {
    async move {
        resolve_session(Some(session_id), user_id, session_repo).await?;
        let discarded = intake.cancel(user_id);
        let session = session_repo
            .update_status(session_id, SessionStatus::Cancelled)
            .await?;
        info!(discarded, "session cancelled");
        Ok(session)
    }
    .instrument(info_span!("cancel_session", session_id, user_id))
    .await
}

/// Resolve the user's session, optionally by explicit ID.
///
/// Without an ID the user's active session is returned.
///
/// # Errors
///
/// Returns `AppError::NotFound` if no matching session exists or it belongs
/// to a different user.
pub async fn resolve_session(
    session_id: Option<&str>,
    user_id: &str,
    session_repo: &SessionRepo,
) -> Result<Session> {
    let session = if let Some(id) = session_id {
        session_repo.get_by_id(id).await?
    } else {
        session_repo
            .find_active_for_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("no active session found for user".into()))?
    };

    if session.owner_user_id != user_id {
        return Err(AppError::NotFound(
            "session belongs to a different user".into(),
        ));
    }

    Ok(session)
}
