//! Batch intake queue: per-user enqueue with debounce, cancel, and flush.
//!
//! Every enqueue restarts the user's quiet-period timer. When it elapses the
//! queue is flushed into a [`BatchWorker`] run, unless a run already holds
//! the user's lock; that run keeps draining the same live queue, so nothing
//! is lost. Manual text entry and price refreshes share the same lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::models::item::ItemSource;
use crate::models::screenshot::PendingScreenshot;
use crate::recognition::ExtractedLine;
use crate::{AppError, Result};

use super::debounce;
use super::registry::{RunGuard, RunRegistry};
use super::worker::{BatchRun, BatchWorker, Ingested};

/// Outcome of a manual text submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextIngest {
    /// Distinct recognized items merged.
    pub added: usize,
    /// Names the catalog did not know.
    pub unrecognized: Vec<String>,
    /// Working-set size after the merge.
    pub total_items: usize,
}

/// Parse `Name|Quantity` lines. Quantity is optional and defaults to 1;
/// blank lines and lines without a name are skipped.
#[must_use]
pub fn parse_text_lines(text: &str) -> Vec<ExtractedLine> {
    text.lines()
        .filter_map(|line| {
            let (name, quantity) = match line.split_once('|') {
                Some((name, quantity)) => (name, quantity.trim().parse::<u32>().unwrap_or(1)),
                None => (line, 1),
            };
            let name = name.trim();
            (!name.is_empty()).then(|| ExtractedLine::new(name, quantity))
        })
        .collect()
}

/// Front door of the intake pipeline.
pub struct BatchIntake {
    registry: Arc<RunRegistry>,
    worker: Arc<BatchWorker>,
    debounce: Duration,
    this: Weak<Self>,
}

impl BatchIntake {
    /// Wrap a worker; `debounce` is the quiet period before a flush.
    #[must_use]
    pub fn new(worker: Arc<BatchWorker>, debounce: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry: Arc::clone(worker.registry()),
            worker,
            debounce,
            this: this.clone(),
        })
    }

    /// Queue a screenshot for the user's session and restart the quiet period.
    ///
    /// Returns the queued screenshot.
    pub fn enqueue(&self, user_id: &str, session_id: &str, handle: impl Into<String>) -> PendingScreenshot {
        let screenshot = PendingScreenshot::new(handle);
        let queued = self.registry.push(user_id, session_id, screenshot.clone());
        debug!(user_id, session_id, screenshot_id = %screenshot.id, queued, "screenshot queued");
        self.arm_debounce(user_id);
        screenshot
    }

    fn arm_debounce(&self, user_id: &str) {
        let this = self.this.clone();
        let user = user_id.to_owned();
        let handle = debounce::schedule(self.debounce, async move {
            if let Some(intake) = this.upgrade() {
                intake.flush(&user);
            }
        });
        self.registry.replace_debounce(user_id, handle);
    }

    /// Start a batch run for the user now.
    ///
    /// Returns `None` when a run is already active (the active run drains the
    /// queue) or nothing is queued.
    pub fn flush(&self, user_id: &str) -> Option<JoinHandle<BatchRun>> {
        let Some(guard) = self.registry.try_begin_run(user_id) else {
            debug!(user_id, "flush skipped: run active or queue empty");
            return None;
        };
        let intake = self.this.upgrade()?;
        let user = user_id.to_owned();

        Some(tokio::spawn(async move {
            let run = intake.worker.run(&guard).await;
            if guard.release() {
                debug!(user_id = %user, "screenshots arrived after drain; re-arming");
                intake.arm_debounce(&user);
            }
            run
        }))
    }

    /// Cancel the user's run and discard the queue. Returns the number of
    /// discarded screenshots.
    pub fn cancel(&self, user_id: &str) -> usize {
        let discarded = self.registry.cancel(user_id);
        info!(user_id, discarded, "batch cancelled");
        discarded
    }

    /// Merge `Name|Quantity` lines into the session working set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Busy` while a batch run holds the user's lock or if
    /// the submission is cancelled, and store errors otherwise.
    pub async fn submit_text(&self, user_id: &str, session_id: &str, text: &str) -> Result<TextIngest> {
        let guard = self
            .registry
            .try_acquire(user_id, session_id)
            .ok_or_else(|| AppError::Busy("a batch is still being processed".into()))?;

        let result = self
            .ingest_text(session_id, text, &guard)
            .instrument(info_span!("submit_text", user_id, session_id))
            .await;

        self.release(guard);
        result
    }

    /// Re-price every stored item of the session.
    ///
    /// Returns the number of items that received fresh prices.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Busy` while a batch run holds the user's lock or if
    /// the refresh is cancelled, and store errors otherwise.
    pub async fn refresh_prices(&self, user_id: &str, session_id: &str) -> Result<usize> {
        let guard = self
            .registry
            .try_acquire(user_id, session_id)
            .ok_or_else(|| AppError::Busy("a batch is still being processed".into()))?;

        let result = self
            .worker
            .refresh_prices(session_id, guard.cancel_token())
            .instrument(info_span!("refresh_prices", user_id, session_id))
            .await
            .and_then(|updated| updated.ok_or_else(|| AppError::Busy("price refresh cancelled".into())));

        self.release(guard);
        result
    }

    async fn ingest_text(&self, session_id: &str, text: &str, guard: &RunGuard) -> Result<TextIngest> {
        let lines = parse_text_lines(text);
        let ingested = self
            .worker
            .ingest_lines(session_id, &lines, ItemSource::Screenshot, guard.cancel_token())
            .await?;
        let Ingested::Committed {
            added,
            unrecognized,
        } = ingested
        else {
            return Err(AppError::Busy("text submission cancelled".into()));
        };
        let total_items = self.worker.total_items(session_id).await?;
        info!(
            lines = lines.len(),
            added,
            unrecognized = unrecognized.len(),
            total_items,
            "text lines merged"
        );
        Ok(TextIngest {
            added,
            unrecognized,
            total_items,
        })
    }

    fn release(&self, guard: RunGuard) {
        let user_id = guard.user_id().to_owned();
        if guard.release() {
            self.arm_debounce(&user_id);
        }
    }

    /// Whether a run holds the user's lock.
    #[must_use]
    pub fn is_running(&self, user_id: &str) -> bool {
        self.registry.is_running(user_id)
    }

    /// Screenshots waiting for the user.
    #[must_use]
    pub fn queued(&self, user_id: &str) -> usize {
        self.registry.queued(user_id)
    }
}
