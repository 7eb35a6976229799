//! Group-based aggregation of in-flight work.
//!
//! A [`Group`] tracks an outstanding count of units that have entered and
//! not yet left, and fires a single completion notification each time the
//! count returns to zero. Units join a group either manually
//! ([`enter`](Group::enter)/[`leave`](Group::leave)) or by submitting work
//! through it ([`launch`](Group::launch)), which wires the leave to the
//! work's completion.
//!
//! The count, the notification slot, and the zero-crossing check all live
//! under one per-group mutex, so two concurrent leaves cannot double-fire
//! and an enter cannot race a firing.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::DispatchError;
use crate::queue::Queue;
use crate::task::Notification;

#[derive(Default)]
struct GroupState {
    outstanding: usize,
    /// True once any `enter()` has occurred since the last firing. Keeps
    /// a freshly created group from firing spuriously while still letting
    /// a callback registered after the work already drained fire at once.
    armed: bool,
    /// At most one registered completion callback; a later registration
    /// replaces an earlier one.
    notification: Option<Notification>,
}

struct GroupInner {
    state: Mutex<GroupState>,
    idle: Condvar,
}

/// An aggregation of independently-completing units of work with a single
/// completion signal.
///
/// Cloning is shallow; all clones share the same count.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().expect("group mutex poisoned");
        f.debug_struct("Group")
            .field("outstanding", &state.outstanding)
            .field("has_notification", &state.notification.is_some())
            .finish()
    }
}

impl Group {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                state: Mutex::new(GroupState::default()),
                idle: Condvar::new(),
            }),
        }
    }

    /// Registers one unit of outstanding work.
    ///
    /// Must be balanced by a later [`leave`](Self::leave).
    pub fn enter(&self) {
        let mut state = self.inner.state.lock().expect("group mutex poisoned");
        state.outstanding += 1;
        state.armed = true;
        tracing::trace!(outstanding = state.outstanding, "group enter");
    }

    /// Marks one unit of outstanding work as finished.
    ///
    /// If this drops the count to zero, the registered completion
    /// notification (if any) is taken and dispatched, and blocked
    /// [`wait`](Self::wait) callers wake.
    ///
    /// # Panics
    ///
    /// Panics if called without a matching prior `enter()`. Silently
    /// clamping would mask a group whose completion already fired
    /// prematurely; see [`try_leave`](Self::try_leave) for a reporting
    /// variant.
    pub fn leave(&self) {
        if let Err(err) = self.try_leave() {
            panic!("{err}");
        }
    }

    /// Like [`leave`](Self::leave), but reports an unbalanced leave as
    /// [`DispatchError::UnbalancedLeave`] instead of panicking.
    pub fn try_leave(&self) -> Result<(), DispatchError> {
        let fired = {
            let mut state = self.inner.state.lock().expect("group mutex poisoned");
            if state.outstanding == 0 {
                return Err(DispatchError::UnbalancedLeave);
            }
            state.outstanding -= 1;
            tracing::trace!(outstanding = state.outstanding, "group leave");
            if state.outstanding == 0 {
                self.inner.idle.notify_all();
                let notification = state.notification.take();
                if notification.is_some() {
                    state.armed = false;
                }
                notification
            } else {
                None
            }
        };
        // Dispatch outside the lock; the slot was already cleared, so a
        // concurrent leave cannot observe and fire it again.
        if let Some(notification) = fired {
            notification.dispatch();
        }
        Ok(())
    }

    /// Submits `work` to `queue` as a member of this group: enters before
    /// scheduling and leaves when the work completes.
    ///
    /// Returns `&self` so multiple launches chain fluently.
    pub fn launch<F>(&self, queue: &Queue, work: F) -> Result<&Self, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enter();
        let completion = self.clone();
        let submitted = queue.submit_job(Box::new(move || {
            work();
            completion.leave();
        }));
        if let Err(err) = submitted {
            // The job never ran; rebalance. This cannot itself be
            // unbalanced since we just entered.
            let _ = self.try_leave();
            return Err(err);
        }
        Ok(self)
    }

    /// Registers the completion callback, replacing any prior
    /// registration.
    ///
    /// The callback fires when the outstanding count reaches zero,
    /// dispatched to `queue`. Registering after entered work has already
    /// drained fires immediately, so a registration cannot be lost to a
    /// fast-completing unit. It never fires spuriously: a group that has
    /// seen no `enter()` since its last firing holds the callback until
    /// work enters and drains again.
    pub fn notify<F>(&self, queue: &Queue, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let notification = Notification {
            queue: queue.clone(),
            work: Box::new(work),
            settle: None,
        };
        let fire_now = {
            let mut state = self.inner.state.lock().expect("group mutex poisoned");
            if state.outstanding == 0 && state.armed {
                state.armed = false;
                Some(notification)
            } else {
                let replaced = state.notification.replace(notification).is_some();
                if replaced {
                    tracing::debug!("group notification replaced an earlier registration");
                }
                None
            }
        };
        if let Some(notification) = fire_now {
            notification.dispatch();
        }
    }

    /// Blocks the calling thread until the outstanding count reaches
    /// zero.
    ///
    /// Returns immediately if the group is already idle.
    pub fn wait(&self) {
        let mut state = self.inner.state.lock().expect("group mutex poisoned");
        while state.outstanding > 0 {
            state = self
                .inner
                .idle
                .wait(state)
                .expect("group mutex poisoned");
        }
    }

    /// Blocks until the outstanding count reaches zero or `timeout`
    /// elapses. Returns whether it reached zero.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock().expect("group mutex poisoned");
        while state.outstanding > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .inner
                .idle
                .wait_timeout(state, remaining)
                .expect("group mutex poisoned")
                .0;
        }
        true
    }
}
