//! Batch worker: drains one user's queue into the session working set.
//!
//! A run moves through `Idle → Draining → (Stopping | Completing) → Idle`.
//! While draining it pops screenshots strictly in arrival order and, for
//! each one, fetches the bytes, recognizes lines, corrects and enriches
//! them, merges them into the stored working set and replaces it. Failures
//! of a single screenshot are counted and never stop the run; only
//! cancellation, an invalid or expired session, and the screenshot limit end
//! a drain early.
//!
//! Cancellation is checked before every screenshot, after the fetch, while
//! recognition is in flight, after enrichment, and right before the commit,
//! so a cancelled screenshot never reaches the store.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::catalog::Catalog;
use crate::config::IntakeConfig;
use crate::market::enricher::MarketEnricher;
use crate::market::PriceInfo;
use crate::models::item::{ItemSource, WorkingSetItem};
use crate::models::report::{BatchProgress, BatchReport, RunOutcome};
use crate::models::screenshot::PendingScreenshot;
use crate::recognition::{ExtractedLine, Recognizer};
use crate::screenshot::ScreenshotSource;
use crate::Result;

use super::consolidator::{consolidate, LineAccumulator};
use super::gate::SessionGate;
use super::ports::{ReportSink, WorkingSetStore};
use super::registry::{RunGuard, RunRegistry};

/// External collaborators of the worker.
pub struct WorkerDeps {
    /// Resolves screenshot handles to bytes.
    pub source: Arc<dyn ScreenshotSource>,
    /// Image-understanding service.
    pub recognizer: Arc<dyn Recognizer>,
    /// Preloaded catalog.
    pub catalog: Arc<Catalog>,
    /// Shared, globally rate-limited price lookup.
    pub enricher: Arc<MarketEnricher>,
    /// Session validity and limits.
    pub gate: Arc<dyn SessionGate>,
    /// Working-set storage.
    pub store: Arc<dyn WorkingSetStore>,
    /// Report delivery.
    pub sink: Arc<dyn ReportSink>,
}

/// Tunables taken from `[intake]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Re-validate the session every this many screenshots.
    pub session_check_interval: u32,
    /// Distinct unrecognized names shown in a report.
    pub report_preview_limit: usize,
    /// Finalize the session when the queue empties normally.
    pub finalize_on_drain: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&IntakeConfig::default())
    }
}

impl WorkerSettings {
    /// Extract worker settings from the intake config section.
    #[must_use]
    pub fn from_config(config: &IntakeConfig) -> Self {
        Self {
            session_check_interval: config.session_check_interval.max(1),
            report_preview_limit: config.report_preview_limit,
            finalize_on_drain: config.finalize_on_drain,
        }
    }
}

/// Result of one batch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRun {
    /// Terminal transition.
    pub outcome: RunOutcome,
    /// Report sent to the sink; `None` when the session was invalid.
    pub report: Option<BatchReport>,
}

/// Result of merging a list of lines into a working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// Recognized items were committed (possibly none).
    Committed {
        /// Distinct canonical items merged.
        added: usize,
        /// Raw names the catalog did not know.
        unrecognized: Vec<String>,
    },
    /// Cancellation was observed before the commit; nothing was written.
    Abandoned,
}

enum ScreenshotResult {
    Committed {
        added: usize,
        unrecognized: Vec<String>,
    },
    NothingDetected,
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionBudget {
    limit: u32,
    used_at_start: u32,
}

/// Drains per-user queues; shared by every user's runs.
pub struct BatchWorker {
    deps: WorkerDeps,
    settings: WorkerSettings,
    registry: Arc<RunRegistry>,
}

impl BatchWorker {
    /// Assemble a worker over a registry.
    #[must_use]
    pub fn new(deps: WorkerDeps, settings: WorkerSettings, registry: Arc<RunRegistry>) -> Self {
        Self {
            deps,
            settings,
            registry,
        }
    }

    /// Registry holding the queues this worker drains.
    #[must_use]
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// Drain the guarded user's queue until it empties or the run stops.
    pub async fn run(&self, guard: &RunGuard) -> BatchRun {
        let span = info_span!(
            "batch_run",
            user_id = guard.user_id(),
            session_id = guard.session_id()
        );
        async move {
            let (outcome, progress, budget) = self.drain(guard).await;
            self.terminate(guard, outcome, &progress, budget).await
        }
        .instrument(span)
        .await
    }

    async fn drain(&self, guard: &RunGuard) -> (RunOutcome, BatchProgress, SessionBudget) {
        let user_id = guard.user_id();
        let session_id = guard.session_id();
        let cancel = guard.cancel_token();
        let mut progress = BatchProgress::default();

        let budget = match self.load_budget(session_id).await {
            Ok((budget, None)) => budget,
            Ok((budget, Some(outcome))) => return (outcome, progress, budget),
            Err(err) => {
                error!(%err, "cannot read session; abandoning run");
                return (RunOutcome::SessionInvalid, progress, SessionBudget::default());
            }
        };
        info!(
            queued = self.registry.queued(user_id),
            limit = budget.limit,
            used = budget.used_at_start,
            "batch run started"
        );

        let outcome = loop {
            if cancel.is_cancelled() {
                break RunOutcome::Cancelled;
            }

            if progress.processed > 0
                && progress.processed % self.settings.session_check_interval == 0
            {
                match self.check_session(session_id).await {
                    Ok(Some(outcome)) => break outcome,
                    Ok(None) => {}
                    Err(err) => warn!(%err, "session re-validation failed; continuing"),
                }
            }

            if budget.used_at_start.saturating_add(progress.processed) >= budget.limit {
                break RunOutcome::LimitReached;
            }

            let Some(screenshot) = self.registry.pop_front(user_id, session_id) else {
                break RunOutcome::Drained;
            };

            match self.process_screenshot(session_id, &screenshot, cancel).await {
                Ok(ScreenshotResult::Committed {
                    added,
                    unrecognized,
                }) => {
                    debug!(screenshot_id = %screenshot.id, added, unrecognized = unrecognized.len(), "screenshot committed");
                    progress.record_committed(added, unrecognized);
                }
                Ok(ScreenshotResult::NothingDetected) => {
                    info!(screenshot_id = %screenshot.id, "no items detected");
                    progress.record_empty();
                }
                Ok(ScreenshotResult::Abandoned) => {
                    info!(screenshot_id = %screenshot.id, "screenshot abandoned after cancellation");
                    break RunOutcome::Cancelled;
                }
                Err(err) => {
                    warn!(screenshot_id = %screenshot.id, %err, "error processing screenshot");
                    progress.record_failed();
                }
            }

            if let Err(err) = self.deps.gate.record_screenshot(session_id).await {
                warn!(%err, "failed to count consumed screenshot");
            }
        };

        (outcome, progress, budget)
    }

    /// Limits at run start, plus the outcome that stops the run right away.
    async fn load_budget(&self, session_id: &str) -> Result<(SessionBudget, Option<RunOutcome>)> {
        if !self.deps.gate.is_active(session_id).await? {
            return Ok((SessionBudget::default(), Some(RunOutcome::SessionInvalid)));
        }
        let budget = SessionBudget {
            limit: self.deps.gate.screenshot_limit(session_id).await?,
            used_at_start: self.deps.gate.screenshots_used(session_id).await?,
        };
        let expired = self.deps.gate.expiry(session_id).await? <= Utc::now();
        Ok((budget, expired.then_some(RunOutcome::Expired)))
    }

    async fn check_session(&self, session_id: &str) -> Result<Option<RunOutcome>> {
        if !self.deps.gate.is_active(session_id).await? {
            return Ok(Some(RunOutcome::SessionInvalid));
        }
        if self.deps.gate.expiry(session_id).await? <= Utc::now() {
            return Ok(Some(RunOutcome::Expired));
        }
        Ok(None)
    }

    async fn process_screenshot(
        &self,
        session_id: &str,
        screenshot: &PendingScreenshot,
        cancel: &CancellationToken,
    ) -> Result<ScreenshotResult> {
        let image = self.deps.source.fetch_bytes(screenshot).await?;
        if cancel.is_cancelled() {
            return Ok(ScreenshotResult::Abandoned);
        }

        let lines = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(ScreenshotResult::Abandoned),
            lines = self.deps.recognizer.recognize(image) => lines?,
        };
        if lines.is_empty() {
            return Ok(ScreenshotResult::NothingDetected);
        }

        match self
            .ingest_lines(session_id, &lines, ItemSource::Screenshot, cancel)
            .await?
        {
            Ingested::Committed {
                added,
                unrecognized,
            } => Ok(ScreenshotResult::Committed {
                added,
                unrecognized,
            }),
            Ingested::Abandoned => Ok(ScreenshotResult::Abandoned),
        }
    }

    /// Correct, enrich and merge `lines` into the session's working set.
    ///
    /// Each distinct canonical name is enriched once; a failed lookup stores
    /// the item with zero prices. Nothing is written when no line is
    /// recognized or when `cancel` fires before the commit.
    ///
    /// # Errors
    ///
    /// Returns the store error if reading or replacing the working set fails.
    pub async fn ingest_lines(
        &self,
        session_id: &str,
        lines: &[ExtractedLine],
        source: ItemSource,
        cancel: &CancellationToken,
    ) -> Result<Ingested> {
        let mut accumulator = LineAccumulator::new();
        for line in lines {
            accumulator.add(&self.deps.catalog, &line.name, line.quantity);
        }
        let (canonical, unrecognized) = accumulator.into_parts();
        if canonical.is_empty() {
            return Ok(Ingested::Committed {
                added: 0,
                unrecognized,
            });
        }

        let prices = join_all(canonical.iter().map(|(name, _)| self.enrich_soft(name))).await;
        if cancel.is_cancelled() {
            return Ok(Ingested::Abandoned);
        }

        let fresh: Vec<WorkingSetItem> = canonical
            .into_iter()
            .zip(prices)
            .map(|((name, quantity), price)| {
                WorkingSetItem::enriched(session_id, name, quantity, price.as_ref(), source)
            })
            .collect();
        let added = fresh.len();

        let existing = self.deps.store.get_items(session_id).await?;
        let merged = consolidate(fresh, existing);
        if cancel.is_cancelled() {
            return Ok(Ingested::Abandoned);
        }
        self.deps.store.replace_items(session_id, &merged).await?;
        debug!(session_id, added, total = merged.len(), "working set replaced");

        Ok(Ingested::Committed {
            added,
            unrecognized,
        })
    }

    /// Re-enrich every stored item of a session and replace the set.
    ///
    /// Items whose lookup fails keep their previous prices. Returns the
    /// number of items that received fresh prices, or `None` when `cancel`
    /// fired before the commit.
    ///
    /// # Errors
    ///
    /// Returns the store error if reading or replacing the working set fails.
    pub async fn refresh_prices(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>> {
        let mut items = self.deps.store.get_items(session_id).await?;
        if items.is_empty() {
            return Ok(Some(0));
        }

        let prices = join_all(items.iter().map(|item| self.enrich_soft(&item.name))).await;
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut updated = 0;
        for (item, price) in items.iter_mut().zip(prices) {
            if let Some(price) = price {
                item.apply_price(&price);
                updated += 1;
            }
        }
        self.deps.store.replace_items(session_id, &items).await?;
        info!(session_id, updated, total = items.len(), "prices refreshed");
        Ok(Some(updated))
    }

    /// Working-set size as stored.
    ///
    /// # Errors
    ///
    /// Returns the store error if the working set cannot be read.
    pub async fn total_items(&self, session_id: &str) -> Result<usize> {
        Ok(self.deps.store.get_items(session_id).await?.len())
    }

    async fn enrich_soft(&self, canonical_name: &str) -> Option<PriceInfo> {
        match self.deps.enricher.enrich(canonical_name).await {
            Ok(price) => price,
            Err(err) => {
                warn!(name = canonical_name, %err, "enrichment unavailable; storing zero prices");
                None
            }
        }
    }

    async fn terminate(
        &self,
        guard: &RunGuard,
        outcome: RunOutcome,
        progress: &BatchProgress,
        budget: SessionBudget,
    ) -> BatchRun {
        let user_id = guard.user_id();
        let session_id = guard.session_id();

        match outcome {
            RunOutcome::SessionInvalid => {
                self.registry.clear(user_id);
                warn!(processed = progress.processed, "session no longer active; run abandoned");
                return BatchRun {
                    outcome,
                    report: None,
                };
            }
            RunOutcome::Cancelled => {}
            RunOutcome::Drained if !self.settings.finalize_on_drain => {}
            RunOutcome::Drained | RunOutcome::LimitReached | RunOutcome::Expired => {
                self.registry.clear(user_id);
                if let Err(err) = self.deps.gate.finalize(session_id).await {
                    error!(%err, "session finalization failed");
                }
            }
        }

        let total_items = match self.total_items(session_id).await {
            Ok(total) => total,
            Err(err) => {
                warn!(%err, "cannot read working set size for report");
                0
            }
        };
        let report = BatchReport::from_progress(
            user_id,
            session_id,
            outcome,
            progress,
            budget.used_at_start.saturating_add(progress.processed),
            budget.limit,
            total_items,
            self.settings.report_preview_limit,
        );
        if let Err(err) = self.deps.sink.deliver(&report).await {
            warn!(%err, "report delivery failed");
        }

        info!(
            outcome = ?outcome,
            processed = progress.processed,
            added = progress.added,
            failed = progress.failed_screenshots,
            total_items,
            "batch run finished"
        );
        BatchRun {
            outcome,
            report: Some(report),
        }
    }
}
