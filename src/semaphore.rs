//! Counting semaphore with blocking wait.
//!
//! Classic counting semantics: [`wait`](Semaphore::wait) decrements the
//! counter and blocks while it is negative; [`signal`](Semaphore::signal)
//! increments it and wakes at most one waiter. A negative counter is the
//! number of outstanding signals needed before all current waiters can
//! proceed. No signal is ever lost, including against a timing-out
//! waiter.
//!
//! Dropping a semaphore while threads are still blocked on it is a caller
//! contract violation, not guarded here — the waiters would block on
//! freed state in the primitive this models, and in Rust the borrow
//! checker makes the shared-ownership variant (`Arc<Semaphore>`) the
//! natural usage anyway.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

struct SemState {
    /// May go negative while waiters are blocked.
    count: i64,
    /// Signals handed to blocked waiters but not yet consumed. Separate
    /// from `count` so a timing-out waiter cannot swallow a wakeup meant
    /// for another.
    wakeups: usize,
}

/// A counting semaphore.
pub struct Semaphore {
    state: Mutex<SemState>,
    available: Condvar,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("semaphore mutex poisoned");
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .finish()
    }
}

impl Semaphore {
    /// Creates a semaphore with `count` permits initially available.
    ///
    /// # Panics
    ///
    /// Panics if `count` is negative.
    #[must_use]
    pub fn new(count: i64) -> Self {
        assert!(count >= 0, "initial semaphore count must be non-negative");
        Self {
            state: Mutex::new(SemState { count, wakeups: 0 }),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.count -= 1;
        if state.count >= 0 {
            return;
        }
        loop {
            state = self
                .available
                .wait(state)
                .expect("semaphore mutex poisoned");
            if state.wakeups > 0 {
                state.wakeups -= 1;
                return;
            }
        }
    }

    /// Blocks until a permit is available or `timeout` elapses.
    ///
    /// Returns `true` with a permit taken, or `false` on timeout without
    /// consuming one.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.count -= 1;
        if state.count >= 0 {
            return true;
        }
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                // Withdraw from the wait. A signal may have raced in and
                // granted us a wakeup; take it if so, otherwise undo the
                // decrement so the permit accounting stays balanced.
                if state.wakeups > 0 {
                    state.wakeups -= 1;
                    return true;
                }
                state.count += 1;
                return false;
            }
            state = self
                .available
                .wait_timeout(state, remaining)
                .expect("semaphore mutex poisoned")
                .0;
            if state.wakeups > 0 {
                state.wakeups -= 1;
                return true;
            }
        }
    }

    /// Returns a permit, waking at most one blocked waiter.
    ///
    /// Returns whether a waiter was woken.
    pub fn signal(&self) -> bool {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.count += 1;
        if state.count <= 0 {
            state.wakeups += 1;
            self.available.notify_one();
            true
        } else {
            false
        }
    }
}
