//! Batch worker drain behaviour: ordering, soft failures, cancellation,
//! screenshot limit, expiry and session invalidation.

use std::time::Duration;

use inventory_intake::models::report::RunOutcome;
use inventory_intake::models::session::{Session, SessionKind, SessionStatus};
use inventory_intake::orchestrator::worker::WorkerSettings;
use inventory_intake::AppError;

use super::test_helpers::{
    active_session, harness, items, next_report, settings, wait_started,
};

const USER: &str = "U_WORKER";
const LONG_DEBOUNCE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn screenshots_are_recognized_in_arrival_order() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.market.push("forma", &[5.0], &[4.0]);

    for handle in ["A", "B", "C"] {
        h.intake.enqueue(USER, &session.id, handle);
    }
    h.recognizer.script("B", &[("Форма", 1)]);

    let run = h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(run.outcome, RunOutcome::Drained);
    assert_eq!(h.recognizer.calls(), vec!["A", "B", "C"]);
    let report = next_report(&mut h.reports).await;
    assert_eq!(report.processed, 3);
    assert_eq!(report.empty_screenshots, 2);
    assert_eq!(report.added, 1);
    assert_eq!(report.total_items, 1);
}

#[tokio::test]
async fn recognition_failure_does_not_stop_siblings() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.market.push("forma", &[5.0], &[]);
    h.market.push("ash-prime-systems", &[20.0], &[15.0]);

    h.recognizer.script("A", &[("Форма", 2)]);
    h.recognizer.fail("B");
    h.recognizer.script("C", &[("Эш Прайм: Системы", 1)]);
    for handle in ["A", "B", "C"] {
        h.intake.enqueue(USER, &session.id, handle);
    }

    let run = h.intake.flush(USER).expect("run starts").await.expect("join");
    assert_eq!(run.outcome, RunOutcome::Drained);

    let stored = items(&h.item_repo, &session.id).await;
    let names: Vec<&str> = stored.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, vec!["Форма", "Эш Прайм: Системы"]);

    let report = next_report(&mut h.reports).await;
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed_screenshots, 1);
    assert_eq!(report.added, 2);
}

#[tokio::test]
async fn fetch_failure_is_counted_as_failed_screenshot() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.source.fail("A");
    h.recognizer.script("B", &[("Форма", 1)]);
    h.market.push("forma", &[1.0], &[1.0]);

    h.intake.enqueue(USER, &session.id, "A");
    h.intake.enqueue(USER, &session.id, "B");
    h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(h.recognizer.calls(), vec!["B"]);
    let report = next_report(&mut h.reports).await;
    assert_eq!(report.failed_screenshots, 1);
    assert_eq!(report.total_items, 1);

    let stored = h.session_repo.get_by_id(&session.id).await.expect("session");
    assert_eq!(stored.screenshot_count, 2);
}

#[tokio::test]
async fn cancellation_discards_the_tail() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.market.push("forma", &[5.0], &[4.0]);
    h.recognizer.script("A", &[("Форма", 1)]);
    h.recognizer.script("B", &[("Эш Прайм: Системы", 1)]);
    h.recognizer.script("C", &[("Эш Прайм: Системы", 1)]);
    h.source.hold("B");

    for handle in ["A", "B", "C"] {
        h.intake.enqueue(USER, &session.id, handle);
    }
    let run = h.intake.flush(USER).expect("run starts");

    wait_started(&mut h.started, "B").await;
    let discarded = h.intake.cancel(USER);
    assert_eq!(discarded, 1, "only C was still queued");
    h.source.release("B");

    let run = run.await.expect("join");
    assert_eq!(run.outcome, RunOutcome::Cancelled);
    assert_eq!(h.recognizer.calls(), vec!["A"]);

    let stored = items(&h.item_repo, &session.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Форма");

    let report = next_report(&mut h.reports).await;
    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.processed, 1);
    assert!(!h.intake.is_running(USER));
}

#[tokio::test]
async fn cancellation_during_recognition_writes_nothing() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.recognizer.script("A", &[("Форма", 1)]);
    h.market.push("forma", &[5.0], &[4.0]);
    h.recognizer.hold("A");

    h.intake.enqueue(USER, &session.id, "A");
    let run = h.intake.flush(USER).expect("run starts");

    wait_started(&mut h.recognizing, "A").await;
    h.intake.cancel(USER);
    h.recognizer.release("A");

    let run = run.await.expect("join");
    assert_eq!(run.outcome, RunOutcome::Cancelled);
    assert!(h.market.calls().is_empty(), "abandoned before enrichment");
    assert!(items(&h.item_repo, &session.id).await.is_empty());

    let stored = h.session_repo.get_by_id(&session.id).await.expect("session");
    assert_eq!(stored.screenshot_count, 0, "abandoned screenshot is not counted");
    assert_eq!(next_report(&mut h.reports).await.processed, 0);
}

#[tokio::test]
async fn cancellation_during_enrichment_writes_nothing() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.recognizer.script("A", &[("Форма", 1)]);
    h.market.push("forma", &[5.0], &[4.0]);
    h.market.hold("forma");

    h.intake.enqueue(USER, &session.id, "A");
    let run = h.intake.flush(USER).expect("run starts");

    wait_started(&mut h.pricing, "forma").await;
    h.intake.cancel(USER);
    h.market.release("forma");

    let run = run.await.expect("join");
    assert_eq!(run.outcome, RunOutcome::Cancelled);
    assert_eq!(h.market.calls(), vec!["forma"]);
    assert!(items(&h.item_repo, &session.id).await.is_empty());
    assert_eq!(next_report(&mut h.reports).await.outcome, RunOutcome::Cancelled);
}

#[tokio::test]
async fn cancellation_before_commit_writes_nothing() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.recognizer.script("A", &[("Форма", 1)]);
    h.market.push("forma", &[5.0], &[4.0]);
    h.store.hold_read(&session.id);

    h.intake.enqueue(USER, &session.id, "A");
    let run = h.intake.flush(USER).expect("run starts");

    // The worker has enriched and is reading the stored set to merge into.
    wait_started(&mut h.reading, &session.id).await;
    h.intake.cancel(USER);
    h.store.release_read(&session.id);

    let run = run.await.expect("join");
    assert_eq!(run.outcome, RunOutcome::Cancelled);
    assert_eq!(h.market.calls(), vec!["forma"]);
    assert!(items(&h.item_repo, &session.id).await.is_empty());
    assert_eq!(next_report(&mut h.reports).await.total_items, 0);
}

#[tokio::test]
async fn limit_reached_finalizes_and_drops_rest() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 2).await;

    for handle in ["A", "B", "C"] {
        h.intake.enqueue(USER, &session.id, handle);
    }
    let run = h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(run.outcome, RunOutcome::LimitReached);
    assert_eq!(h.recognizer.calls(), vec!["A", "B"]);
    assert_eq!(h.intake.queued(USER), 0);

    let stored = h.session_repo.get_by_id(&session.id).await.expect("session");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.screenshot_count, 2);

    let report = next_report(&mut h.reports).await;
    assert_eq!(report.session_screenshots, 2);
    assert_eq!(report.screenshot_limit, 2);
}

#[tokio::test]
async fn limit_counts_screenshots_from_earlier_batches() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 3).await;

    h.intake.enqueue(USER, &session.id, "A");
    h.intake.enqueue(USER, &session.id, "B");
    let first = h.intake.flush(USER).expect("first run").await.expect("join");
    assert_eq!(first.outcome, RunOutcome::Drained);
    let _ = next_report(&mut h.reports).await;

    h.intake.enqueue(USER, &session.id, "C");
    h.intake.enqueue(USER, &session.id, "D");
    let second = h.intake.flush(USER).expect("second run").await.expect("join");

    assert_eq!(second.outcome, RunOutcome::LimitReached);
    assert_eq!(h.recognizer.calls(), vec!["A", "B", "C"]);
    let report = next_report(&mut h.reports).await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.session_screenshots, 3);
}

#[tokio::test]
async fn expired_session_is_finalized_without_processing() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = Session::new(
        USER.to_owned(),
        SessionKind::Multishot,
        16,
        chrono::Duration::minutes(-1),
    );
    let session = h.session_repo.create(&session).await.expect("create");

    h.intake.enqueue(USER, &session.id, "A");
    let run = h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(run.outcome, RunOutcome::Expired);
    assert!(h.recognizer.calls().is_empty());
    let stored = h.session_repo.get_by_id(&session.id).await.expect("session");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(next_report(&mut h.reports).await.outcome, RunOutcome::Expired);
}

#[tokio::test]
async fn session_expiring_mid_run_is_finalized() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = Session::new(
        USER.to_owned(),
        SessionKind::Multishot,
        16,
        chrono::Duration::milliseconds(300),
    );
    let session = h.session_repo.create(&session).await.expect("create");
    h.source.hold("A");

    h.intake.enqueue(USER, &session.id, "A");
    h.intake.enqueue(USER, &session.id, "B");
    let run = h.intake.flush(USER).expect("run starts");

    wait_started(&mut h.started, "A").await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    h.source.release("A");

    let run = run.await.expect("join");
    assert_eq!(run.outcome, RunOutcome::Expired);
    assert_eq!(h.recognizer.calls(), vec!["A"], "B is never processed");
    assert_eq!(h.intake.queued(USER), 0);

    let stored = h.session_repo.get_by_id(&session.id).await.expect("session");
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.screenshot_count, 1);

    let report = next_report(&mut h.reports).await;
    assert_eq!(report.outcome, RunOutcome::Expired);
    assert_eq!(report.processed, 1);
}

#[tokio::test]
async fn session_closed_mid_run_abandons_without_report() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.source.hold("A");

    for handle in ["A", "B", "C"] {
        h.intake.enqueue(USER, &session.id, handle);
    }
    let run = h.intake.flush(USER).expect("run starts");

    wait_started(&mut h.started, "A").await;
    h.session_repo
        .update_status(&session.id, SessionStatus::Cancelled)
        .await
        .expect("cancel session");
    h.source.release("A");

    let run = run.await.expect("join");
    assert_eq!(run.outcome, RunOutcome::SessionInvalid);
    assert!(run.report.is_none());
    assert_eq!(h.recognizer.calls(), vec!["A"]);
    assert_eq!(h.intake.queued(USER), 0);
    assert!(h.reports.try_recv().is_err());
}

#[tokio::test]
async fn finalize_on_drain_completes_the_session() {
    let settings = WorkerSettings {
        finalize_on_drain: true,
        ..settings()
    };
    let mut h = harness(settings, LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;

    h.intake.enqueue(USER, &session.id, "A");
    let run = h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(run.outcome, RunOutcome::Drained);
    let stored = h.session_repo.get_by_id(&session.id).await.expect("session");
    assert_eq!(stored.status, SessionStatus::Completed);
    let _ = next_report(&mut h.reports).await;
}

#[tokio::test]
async fn unrecognized_names_are_reported_and_enrichment_failure_keeps_item() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.recognizer.script(
        "A",
        &[("Форма", 1), ("Неизвестный мод", 2), ("неизвестный  мод", 1), ("Чертёж: Висп Прайм", 1)],
    );
    // No market answer for either id: both lookups fail.

    h.intake.enqueue(USER, &session.id, "A");
    h.intake.flush(USER).expect("run starts").await.expect("join");

    let stored = items(&h.item_repo, &session.id).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].name, "Висп Прайм (Чертеж)");
    assert!(stored.iter().all(|item| item.avg_sell.abs() < f64::EPSILON && item.catalog_id.is_none()));

    let report = next_report(&mut h.reports).await;
    assert_eq!(report.added, 2);
    assert_eq!(
        report.unrecognized_preview,
        vec!["Неизвестный мод".to_owned(), "неизвестный  мод".to_owned()]
    );
    assert!(report.render().contains("Name|Quantity"));
}

#[tokio::test]
async fn duplicate_lines_in_one_screenshot_are_enriched_once() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.market.push("forma", &[3.0], &[2.0]);
    h.recognizer
        .script("A", &[("Форма", 2), ("ФОРМА", 3), ("  форма ", 1)]);

    h.intake.enqueue(USER, &session.id, "A");
    h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(h.market.calls(), vec!["forma"]);
    let stored = items(&h.item_repo, &session.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].quantity, 6);
    assert_eq!(next_report(&mut h.reports).await.added, 1);
}

#[tokio::test]
async fn lookup_retries_transient_error_then_stores_zero_prices() {
    let mut h = harness(settings(), LONG_DEBOUNCE).await;
    let session = active_session(&h.session_repo, USER, 16).await;
    h.recognizer.script("A", &[("Форма", 4)]);
    h.market
        .push_error("forma", AppError::Unavailable("502 bad gateway".into()));
    h.market
        .push_error("forma", AppError::Market("400 unknown item".into()));
    h.market.push("forma", &[9.0], &[8.0]);

    h.intake.enqueue(USER, &session.id, "A");
    h.intake.flush(USER).expect("run starts").await.expect("join");

    assert_eq!(
        h.market.calls(),
        vec!["forma", "forma"],
        "5xx retried once, permanent error not retried"
    );
    let stored = items(&h.item_repo, &session.id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].quantity, 4);
    assert!(stored[0].avg_sell.abs() < f64::EPSILON);
    assert!(stored[0].sell_prices.is_empty());
    assert!(stored[0].catalog_id.is_none());
    assert_eq!(next_report(&mut h.reports).await.added, 1);
}
