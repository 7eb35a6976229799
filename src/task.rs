//! Completion handles and follow-up chaining.
//!
//! Submitting work to a [`Queue`](crate::Queue) yields a [`TaskHandle`].
//! The handle supports post-hoc registration of follow-up work via
//! [`notify`](TaskHandle::notify), which returns a *new* handle for the
//! follow-up so chains compose left-to-right:
//!
//! ```ignore
//! let a = queue.submit(step_one)?;
//! a.notify(&q1, step_two).notify(&q2, step_three);
//! // step_two runs after step_one; step_three runs after step_two.
//! ```
//!
//! Registration and completion are mutually exclusive under the handle's
//! lock: a follow-up registered after the source already completed is
//! dispatched immediately instead of being lost.
//!
//! There is no cancellation. Once submitted, a unit runs to completion.

use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::executor::Job;
use crate::queue::Queue;

/// A follow-up registered on a handle or group, bound for `queue`.
pub(crate) struct Notification {
    pub(crate) queue: Queue,
    pub(crate) work: Job,
    /// Handle to settle once the follow-up ran (or was dropped because its
    /// queue went away). `None` for group notifications, which have no
    /// handle of their own.
    pub(crate) settle: Option<Arc<TaskInner>>,
}

impl Notification {
    /// Dispatches this notification to its queue.
    ///
    /// If the queue has been shut down the follow-up is dropped with a
    /// warning, but a settling handle still completes so downstream waits
    /// and chained follow-ups do not hang.
    pub(crate) fn dispatch(self) {
        let Notification {
            queue,
            work,
            settle,
        } = self;
        let job: Job = match settle.as_ref().map(Arc::clone) {
            Some(inner) => Box::new(move || {
                work();
                TaskInner::complete(&inner);
            }),
            None => work,
        };
        if let Err(err) = queue.submit_job(job) {
            tracing::warn!(error = %err, "dropping notification for unavailable queue");
            if let Some(inner) = settle {
                TaskInner::complete(&inner);
            }
        }
    }
}

#[derive(Default)]
struct TaskState {
    completed: bool,
    /// Registration order is dispatch order.
    notifications: SmallVec<[Notification; 2]>,
}

/// Shared state behind a [`TaskHandle`].
pub(crate) struct TaskInner {
    state: Mutex<TaskState>,
    done: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl TaskInner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TaskState::default()),
            done: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        })
    }

    /// Marks the unit complete and dispatches pending notifications in
    /// registration order.
    pub(crate) fn complete(this: &Arc<Self>) {
        let pending = {
            let mut state = this.state.lock().expect("task state poisoned");
            debug_assert!(!state.completed, "task completed twice");
            state.completed = true;
            std::mem::take(&mut state.notifications)
        };
        for notification in pending {
            notification.dispatch();
        }
        this.done.store(true, Ordering::Release);
        let _guard = this.mutex.lock().expect("task mutex poisoned");
        this.condvar.notify_all();
    }
}

/// A handle to a submitted unit of work.
///
/// Cloning is shallow; all clones observe the same completion.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl TaskHandle {
    pub(crate) fn from_inner(inner: Arc<TaskInner>) -> Self {
        Self { inner }
    }

    /// Returns whether the underlying unit of work has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Registers `follow_up` to run on `queue` once this unit finishes,
    /// returning a new handle for the follow-up.
    ///
    /// Follow-ups registered before completion are dispatched in
    /// registration order; each runs on its own declared queue, so their
    /// relative *completion* order across queues is unspecified. A
    /// follow-up registered after this unit already completed is
    /// dispatched immediately.
    pub fn notify<F>(&self, queue: &Queue, follow_up: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let next = TaskInner::new();
        let notification = Notification {
            queue: queue.clone(),
            work: Box::new(follow_up),
            settle: Some(Arc::clone(&next)),
        };

        let fire_now = {
            let mut state = self.inner.state.lock().expect("task state poisoned");
            if state.completed {
                Some(notification)
            } else {
                state.notifications.push(notification);
                None
            }
        };
        if let Some(notification) = fire_now {
            notification.dispatch();
        }

        TaskHandle::from_inner(next)
    }

    /// Blocks the calling thread until this unit has completed.
    pub fn wait(&self) {
        if self.inner.done.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.inner.mutex.lock().expect("task mutex poisoned");
        while !self.inner.done.load(Ordering::Acquire) {
            guard = self
                .inner
                .condvar
                .wait(guard)
                .expect("task mutex poisoned");
        }
    }

    /// Blocks until this unit completes or `timeout` elapses.
    ///
    /// Returns whether the unit completed.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.inner.done.load(Ordering::Acquire) {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.inner.mutex.lock().expect("task mutex poisoned");
        while !self.inner.done.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            guard = self
                .inner
                .condvar
                .wait_timeout(guard, remaining)
                .expect("task mutex poisoned")
                .0;
        }
        true
    }
}
