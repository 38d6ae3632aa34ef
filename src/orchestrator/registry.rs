//! Per-user run state: queue, run lock, cancellation token, debounce timer.
//!
//! All per-user mutable state lives in one [`UserRunState`] per user behind a
//! single synchronous mutex. Critical sections never await, which lets
//! [`RunGuard`] release the run lock from `Drop`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::screenshot::PendingScreenshot;

use super::debounce::DebounceHandle;

/// Everything the intake pipeline tracks for one user.
#[derive(Default)]
struct UserRunState {
    queue: VecDeque<PendingScreenshot>,
    session_id: Option<String>,
    cancel: CancellationToken,
    debounce: Option<DebounceHandle>,
    running: bool,
}

impl UserRunState {
    fn is_idle(&self) -> bool {
        !self.running && self.queue.is_empty() && self.debounce.is_none()
    }
}

/// Registry of [`UserRunState`] keyed by user identifier.
#[derive(Default)]
pub struct RunRegistry {
    users: Mutex<HashMap<String, UserRunState>>,
}

impl RunRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserRunState>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a screenshot to the user's queue and return the queue length.
    ///
    /// A screenshot for a different session than the queued ones discards the
    /// stale queue first.
    pub fn push(&self, user_id: &str, session_id: &str, screenshot: PendingScreenshot) -> usize {
        let mut users = self.lock();
        let state = users.entry(user_id.to_owned()).or_default();
        if state.session_id.as_deref() != Some(session_id) {
            if !state.queue.is_empty() {
                debug!(
                    user_id,
                    session_id,
                    discarded = state.queue.len(),
                    "session changed; dropping stale queue"
                );
            }
            state.queue.clear();
            state.session_id = Some(session_id.to_owned());
        }
        state.queue.push_back(screenshot);
        state.queue.len()
    }

    /// Store a new debounce timer, cancelling the previous one.
    pub fn replace_debounce(&self, user_id: &str, handle: DebounceHandle) {
        let mut users = self.lock();
        let state = users.entry(user_id.to_owned()).or_default();
        state.debounce = Some(handle);
    }

    /// Pop the oldest queued screenshot, if it belongs to `session_id`.
    pub fn pop_front(&self, user_id: &str, session_id: &str) -> Option<PendingScreenshot> {
        let mut users = self.lock();
        let state = users.get_mut(user_id)?;
        if state.session_id.as_deref() != Some(session_id) {
            return None;
        }
        state.queue.pop_front()
    }

    /// Take the run lock for a batch drain.
    ///
    /// Returns `None` when a run is already active or nothing is queued. The
    /// debounce timer is discarded either way, since an active run drains
    /// whatever it would have flushed. A new run gets a fresh cancellation
    /// token.
    pub fn try_begin_run(self: &Arc<Self>, user_id: &str) -> Option<RunGuard> {
        let mut users = self.lock();
        let state = users.get_mut(user_id)?;
        state.debounce = None;
        if state.running {
            return None;
        }
        if state.queue.is_empty() {
            return None;
        }
        let session_id = state.session_id.clone()?;
        Some(Self::begin(self, state, user_id, session_id))
    }

    /// Take the run lock for a non-queue operation on `session_id`.
    ///
    /// Returns `None` when a run is already active.
    pub fn try_acquire(self: &Arc<Self>, user_id: &str, session_id: &str) -> Option<RunGuard> {
        let mut users = self.lock();
        let state = users.entry(user_id.to_owned()).or_default();
        if state.running {
            return None;
        }
        Some(Self::begin(self, state, user_id, session_id.to_owned()))
    }

    fn begin(
        registry: &Arc<Self>,
        state: &mut UserRunState,
        user_id: &str,
        session_id: String,
    ) -> RunGuard {
        state.running = true;
        state.cancel = CancellationToken::new();
        RunGuard {
            registry: Arc::clone(registry),
            user_id: user_id.to_owned(),
            session_id,
            cancel: state.cancel.clone(),
            released: false,
        }
    }

    /// Release the run lock. Returns `true` when screenshots are still
    /// queued and need a new debounce timer.
    fn finish_run(&self, user_id: &str) -> bool {
        let mut users = self.lock();
        let Some(state) = users.get_mut(user_id) else {
            return false;
        };
        state.running = false;
        state.cancel = CancellationToken::new();
        let leftover = !state.queue.is_empty();
        if state.is_idle() {
            users.remove(user_id);
        }
        leftover
    }

    /// Signal cancellation to the active run and discard queued work and the
    /// pending timer. Returns the number of discarded screenshots.
    pub fn cancel(&self, user_id: &str) -> usize {
        let mut users = self.lock();
        let Some(state) = users.get_mut(user_id) else {
            return 0;
        };
        state.cancel.cancel();
        state.debounce = None;
        let discarded = state.queue.len();
        state.queue.clear();
        if state.is_idle() {
            users.remove(user_id);
        }
        discarded
    }

    /// Discard queued work and the pending timer without signalling the run.
    pub fn clear(&self, user_id: &str) {
        let mut users = self.lock();
        if let Some(state) = users.get_mut(user_id) {
            state.queue.clear();
            state.debounce = None;
            if state.is_idle() {
                users.remove(user_id);
            }
        }
    }

    /// Screenshots waiting for the user.
    #[must_use]
    pub fn queued(&self, user_id: &str) -> usize {
        self.lock().get(user_id).map_or(0, |state| state.queue.len())
    }

    /// Whether a run currently holds the user's lock.
    #[must_use]
    pub fn is_running(&self, user_id: &str) -> bool {
        self.lock().get(user_id).is_some_and(|state| state.running)
    }

    /// Whether any state is still held for the user.
    #[must_use]
    pub fn is_tracked(&self, user_id: &str) -> bool {
        self.lock().contains_key(user_id)
    }

    /// Whether a debounce timer is pending for the user.
    #[must_use]
    pub fn has_pending_timer(&self, user_id: &str) -> bool {
        self.lock()
            .get(user_id)
            .and_then(|state| state.debounce.as_ref())
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Exclusive right to work on one user's session.
///
/// Dropping the guard releases the lock even if the run panicked; prefer
/// [`release`](Self::release) to learn whether work is still queued.
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    user_id: String,
    session_id: String,
    cancel: CancellationToken,
    released: bool,
}

impl RunGuard {
    /// User owning the lock.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Session the run works on.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cancellation token of this run.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Release the lock; `true` means screenshots arrived that nobody drained.
    #[must_use]
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry.finish_run(&self.user_id)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.finish_run(&self.user_id);
        }
    }
}
