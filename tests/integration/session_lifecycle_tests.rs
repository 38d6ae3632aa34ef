//! Session lifecycle: one active session per user, ownership checks, and
//! queue cleanup when a session is replaced or cancelled.

use std::time::Duration;

use inventory_intake::config::IntakeConfig;
use inventory_intake::models::session::{SessionKind, SessionStatus};
use inventory_intake::orchestrator::session_manager;
use inventory_intake::AppError;

use super::test_helpers::{harness, settings};

const USER: &str = "U_LIFECYCLE";

#[tokio::test]
async fn start_session_applies_kind_limits_and_ttl() {
    let h = harness(settings(), Duration::from_secs(60)).await;
    let config = IntakeConfig::default();

    let oneshot = session_manager::start_session(
        USER,
        SessionKind::Oneshot,
        &config,
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("start oneshot");
    assert_eq!(oneshot.screenshot_limit, 1);
    assert_eq!(oneshot.status, SessionStatus::Active);
    let ttl = oneshot.expires_at - oneshot.created_at;
    assert_eq!(ttl.num_minutes(), i64::from(config.session_ttl_minutes));

    let multishot = session_manager::start_session(
        "U_OTHER",
        SessionKind::Multishot,
        &config,
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("start multishot");
    assert_eq!(multishot.screenshot_limit, config.screenshot_limit);
}

#[tokio::test]
async fn starting_a_new_session_cancels_the_previous_one_and_its_queue() {
    let h = harness(settings(), Duration::from_secs(60)).await;
    let config = IntakeConfig::default();

    let first = session_manager::start_session(
        USER,
        SessionKind::Multishot,
        &config,
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("first");
    h.intake.enqueue(USER, &first.id, "A");
    h.intake.enqueue(USER, &first.id, "B");

    let second = session_manager::start_session(
        USER,
        SessionKind::Edit,
        &config,
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("second");

    assert_ne!(first.id, second.id);
    assert_eq!(h.intake.queued(USER), 0);
    assert!(!h.registry.has_pending_timer(USER));
    let previous = h.session_repo.get_by_id(&first.id).await.expect("first");
    assert_eq!(previous.status, SessionStatus::Cancelled);
    assert!(previous.completed_at.is_some());

    let active = h
        .session_repo
        .find_active_for_user(USER)
        .await
        .expect("query")
        .expect("one active session");
    assert_eq!(active.id, second.id);
}

#[tokio::test]
async fn cancel_session_discards_queue() {
    let h = harness(settings(), Duration::from_secs(60)).await;
    let session = session_manager::start_session(
        USER,
        SessionKind::Multishot,
        &IntakeConfig::default(),
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("start");
    h.intake.enqueue(USER, &session.id, "A");

    let cancelled = session_manager::cancel_session(&session.id, USER, &h.session_repo, &h.intake)
        .await
        .expect("cancel");
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(h.intake.queued(USER), 0);

    let again = session_manager::cancel_session(&session.id, USER, &h.session_repo, &h.intake)
        .await
        .expect_err("already cancelled");
    assert!(matches!(again, AppError::Db(_)));
}

#[tokio::test]
async fn complete_session_rejects_foreign_owner() {
    let h = harness(settings(), Duration::from_secs(60)).await;
    let session = session_manager::start_session(
        USER,
        SessionKind::Multishot,
        &IntakeConfig::default(),
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("start");

    let err = session_manager::complete_session(&session.id, "U_INTRUDER", &h.session_repo)
        .await
        .expect_err("foreign owner");
    assert!(matches!(err, AppError::NotFound(_)));

    let done = session_manager::complete_session(&session.id, USER, &h.session_repo)
        .await
        .expect("owner completes");
    assert_eq!(done.status, SessionStatus::Completed);
}

#[tokio::test]
async fn resolve_session_defaults_to_the_active_one() {
    let h = harness(settings(), Duration::from_secs(60)).await;

    let missing = session_manager::resolve_session(None, USER, &h.session_repo)
        .await
        .expect_err("no session yet");
    assert!(matches!(missing, AppError::NotFound(_)));

    let session = session_manager::start_session(
        USER,
        SessionKind::Multishot,
        &IntakeConfig::default(),
        &h.session_repo,
        &h.intake,
    )
    .await
    .expect("start");
    let resolved = session_manager::resolve_session(None, USER, &h.session_repo)
        .await
        .expect("active session");
    assert_eq!(resolved.id, session.id);

    let by_id = session_manager::resolve_session(Some(&session.id), USER, &h.session_repo)
        .await
        .expect("by id");
    assert_eq!(by_id.id, session.id);
}
