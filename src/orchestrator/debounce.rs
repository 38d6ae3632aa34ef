//! Cancellable delayed task used for the per-user quiet period.
//!
//! [`schedule`] spawns a timer; if the returned [`DebounceHandle`] is
//! cancelled (or dropped) before the delay elapses the task never runs.
//! Once the delay has elapsed the task runs to completion regardless of the
//! handle, so a flush that already started is never torn down halfway.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Owner of a pending delayed task.
///
/// Dropping the handle cancels the timer, so replacing the stored handle is
/// enough to restart the quiet period.
pub struct DebounceHandle {
    cancel: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl DebounceHandle {
    /// Cancel the timer if it has not fired yet.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the underlying task has finished (fired or cancelled).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
    }
}

impl Drop for DebounceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `task` after `delay` unless the returned handle is cancelled first.
#[must_use]
pub fn schedule<F>(delay: Duration, task: F) -> DebounceHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let join_handle = tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {
                trace!("debounce timer cancelled");
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
        task.await;
    });

    DebounceHandle {
        cancel,
        join_handle,
    }
}
