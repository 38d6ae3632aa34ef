//! Batch progress counters and the final batch report.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// How a batch run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Queue emptied normally.
    Drained,
    /// Session screenshot cap reached; remaining queue discarded.
    LimitReached,
    /// Session expiry observed at a checkpoint.
    Expired,
    /// User cancelled; remaining queue discarded.
    Cancelled,
    /// Backing session missing or no longer active.
    SessionInvalid,
}

/// Per-run transient counters. Reset at the start of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchProgress {
    /// Screenshots consumed by this run, including empty and failed ones.
    pub processed: u32,
    /// Distinct recognized items committed by this run.
    pub added: usize,
    /// Raw names the catalog did not know, in encounter order, with repeats.
    pub unrecognized: Vec<String>,
    /// Screenshots where recognition found nothing.
    pub empty_screenshots: u32,
    /// Screenshots that failed to fetch, recognize, or commit.
    pub failed_screenshots: u32,
}

impl BatchProgress {
    /// Record a screenshot whose items were committed.
    pub fn record_committed(&mut self, added: usize, unrecognized: Vec<String>) {
        self.processed += 1;
        self.added += added;
        self.unrecognized.extend(unrecognized);
    }

    /// Record the "no items detected" marker.
    pub fn record_empty(&mut self) {
        self.processed += 1;
        self.empty_screenshots += 1;
    }

    /// Record the "error processing screenshot" marker.
    pub fn record_failed(&mut self) {
        self.processed += 1;
        self.failed_screenshots += 1;
    }
}

/// Final, user-facing summary of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    /// Owning user.
    pub user_id: String,
    /// Session the run committed into.
    pub session_id: String,
    /// Terminal transition of the run.
    pub outcome: RunOutcome,
    /// Screenshots this run consumed.
    pub processed: u32,
    /// Screenshots consumed by the session so far, across runs.
    pub session_screenshots: u32,
    /// Session screenshot cap.
    pub screenshot_limit: u32,
    /// Distinct recognized items committed by this run.
    pub added: usize,
    /// Working-set size as stored after the run.
    pub total_items: usize,
    /// Screenshots where nothing was detected.
    pub empty_screenshots: u32,
    /// Screenshots that failed.
    pub failed_screenshots: u32,
    /// Deduplicated unrecognized names, capped at the preview limit.
    pub unrecognized_preview: Vec<String>,
    /// Distinct unrecognized names beyond the preview.
    pub unrecognized_hidden: usize,
}

impl BatchReport {
    /// Build a report from run counters.
    #[must_use]
    #[allow(clippy::too_many_arguments)] // Flat report assembly; every argument is a distinct counter.
    pub fn from_progress(
        user_id: &str,
        session_id: &str,
        outcome: RunOutcome,
        progress: &BatchProgress,
        session_screenshots: u32,
        screenshot_limit: u32,
        total_items: usize,
        preview_limit: usize,
    ) -> Self {
        let distinct = dedup_preserving_order(&progress.unrecognized);
        let hidden = distinct.len().saturating_sub(preview_limit);
        let unrecognized_preview = distinct.into_iter().take(preview_limit).collect();

        Self {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            outcome,
            processed: progress.processed,
            session_screenshots,
            screenshot_limit,
            added: progress.added,
            total_items,
            empty_screenshots: progress.empty_screenshots,
            failed_screenshots: progress.failed_screenshots,
            unrecognized_preview,
            unrecognized_hidden: hidden,
        }
    }

    /// Render the report as plain text for a messaging channel.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let headline = match self.outcome {
            RunOutcome::Drained => "✅ Batch processed",
            RunOutcome::LimitReached => "⚠️ Screenshot limit reached, session finalized",
            RunOutcome::Expired => "⏰ Session expired, session finalized",
            RunOutcome::Cancelled => "❌ Batch cancelled",
            RunOutcome::SessionInvalid => "❌ Session is no longer active",
        };
        let _ = writeln!(out, "{headline}");
        let _ = writeln!(
            out,
            "📸 Screenshots: {}/{} (this batch: {})",
            self.session_screenshots, self.screenshot_limit, self.processed
        );
        let _ = writeln!(out, "⚙️ Items added: {}", self.added);
        let _ = writeln!(out, "📋 Items in session: {}", self.total_items);
        if self.empty_screenshots > 0 {
            let _ = writeln!(out, "🔍 No items detected on {} screenshot(s)", self.empty_screenshots);
        }
        if self.failed_screenshots > 0 {
            let _ = writeln!(out, "💥 Failed to process {} screenshot(s)", self.failed_screenshots);
        }

        if !self.unrecognized_preview.is_empty() {
            let total = self.unrecognized_preview.len() + self.unrecognized_hidden;
            let _ = writeln!(out, "\n⚠️ Could not recognize {total} item(s):");
            for name in &self.unrecognized_preview {
                let _ = writeln!(out, "• `{name}`");
            }
            if self.unrecognized_hidden > 0 {
                let _ = writeln!(out, "...and {} more.", self.unrecognized_hidden);
            }
            let _ = writeln!(
                out,
                "\n💡 Fix these names and send them back as text lines in the form `Name|Quantity`."
            );
        }

        out
    }
}

fn dedup_preserving_order(names: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}
