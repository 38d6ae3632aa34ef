//! Working-set store and report sink contracts.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::models::item::WorkingSetItem;
use crate::models::report::BatchReport;
use crate::{AppError, Result};

/// Durable storage for a session's consolidated items.
pub trait WorkingSetStore: Send + Sync {
    /// Stored items of a session, in stored order.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the store cannot be read.
    fn get_items<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Vec<WorkingSetItem>>>;

    /// Atomically replace the whole working set of a session.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if the replace fails; the previous set is kept.
    fn replace_items<'a>(
        &'a self,
        session_id: &'a str,
        items: &'a [WorkingSetItem],
    ) -> BoxFuture<'a, Result<()>>;
}

/// Destination for final batch reports.
pub trait ReportSink: Send + Sync {
    /// Deliver one report.
    ///
    /// # Errors
    ///
    /// Returns an `AppError` if delivery fails.
    fn deliver<'a>(&'a self, report: &'a BatchReport) -> BoxFuture<'a, Result<()>>;
}

/// Report sink backed by a bounded channel.
#[derive(Clone)]
pub struct ChannelReportSink {
    tx: mpsc::Sender<BatchReport>,
}

impl ChannelReportSink {
    /// Create a sink and the receiving end.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BatchReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ReportSink for ChannelReportSink {
    fn deliver<'a>(&'a self, report: &'a BatchReport) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.tx
                .send(report.clone())
                .await
                .map_err(|_| AppError::Io("report channel closed".into()))
        })
    }
}
