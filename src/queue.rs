//! Execution contexts: main, global QoS tiers, and custom queues.
//!
//! A [`Queue`] names a place where work runs. The well-known queues (the
//! main queue and one global queue per [`QosClass`] tier) live for the
//! process lifetime. Custom queues are created explicitly, are serial or
//! concurrent, and may target another queue so their work runs on the
//! target's executor — inheriting its effective priority without giving up
//! their own serial/concurrent discipline.
//!
//! # Serialization
//!
//! A serial queue owns a FIFO drain lane. Submissions append to the lane;
//! at most one drain job is in flight at a time, popping and running lane
//! entries one by one on the underlying executor. This keeps serial
//! semantics even when the executor itself is wide.
//!
//! # Teardown
//!
//! Custom queues are reference counted; dropping the last handle shuts
//! down any executor the queue owns. [`Queue::shutdown`] tears a custom
//! queue down early, after which submissions fail with
//! [`DispatchError::ContextUnavailable`]. Well-known queues ignore
//! shutdown.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use crate::error::DispatchError;
use crate::executor::{Executor, Job};
use crate::group::Group;
use crate::pool::WorkerPool;
use crate::task::{Notification, TaskHandle, TaskInner};
use crate::timer;

/// Quality-of-service tier of a global queue.
///
/// Mapping tiers onto OS scheduling classes is the host's concern; here a
/// tier selects one of the process-wide worker pools and serves as
/// diagnostic metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosClass {
    /// Work the user is actively waiting on (UI-adjacent).
    UserInteractive,
    /// Work the user initiated and expects promptly.
    UserInitiated,
    /// The default tier.
    Default,
    /// Long-running work the user is not waiting on.
    Utility,
    /// Maintenance work with no latency expectation.
    Background,
}

impl QosClass {
    /// All tiers, ordered from most to least urgent.
    pub const ALL: [QosClass; 5] = [
        QosClass::UserInteractive,
        QosClass::UserInitiated,
        QosClass::Default,
        QosClass::Utility,
        QosClass::Background,
    ];

    fn index(self) -> usize {
        match self {
            QosClass::UserInteractive => 0,
            QosClass::UserInitiated => 1,
            QosClass::Default => 2,
            QosClass::Utility => 3,
            QosClass::Background => 4,
        }
    }

    /// Label of the global queue for this tier.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            QosClass::UserInteractive => "global-user-interactive",
            QosClass::UserInitiated => "global-user-initiated",
            QosClass::Default => "global-default",
            QosClass::Utility => "global-utility",
            QosClass::Background => "global-background",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    Main,
    Global(QosClass),
    Custom { serial: bool },
}

/// FIFO lane giving a serial queue one-at-a-time semantics on any
/// executor. `draining` is true while a drain job is scheduled or running.
struct SerialLane {
    state: Mutex<LaneState>,
}

#[derive(Default)]
struct LaneState {
    jobs: VecDeque<Job>,
    draining: bool,
}

impl SerialLane {
    fn new() -> Self {
        Self {
            state: Mutex::new(LaneState::default()),
        }
    }

    /// Appends a job; returns whether the caller must schedule a drain.
    fn push(&self, job: Job) -> bool {
        let mut state = self.state.lock().expect("lane mutex poisoned");
        state.jobs.push_back(job);
        if state.draining {
            false
        } else {
            state.draining = true;
            true
        }
    }

    /// Pops the next job, or clears `draining` and returns `None`.
    fn next(&self) -> Option<Job> {
        let mut state = self.state.lock().expect("lane mutex poisoned");
        let job = state.jobs.pop_front();
        if job.is_none() {
            state.draining = false;
        }
        job
    }
}

struct QueueInner {
    label: String,
    kind: QueueKind,
    /// Where jobs actually run: an owned pool or a target's executor.
    executor: Arc<dyn Executor>,
    /// Present on serial queues.
    lane: Option<SerialLane>,
    /// Set by [`Queue::shutdown`] on custom queues.
    down: AtomicBool,
    /// Pool owned by this queue, shut down on teardown. `None` when the
    /// queue borrows a target's executor.
    owned_pool: Option<WorkerPool>,
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        if let Some(pool) = &self.owned_pool {
            pool.shutdown();
        }
    }
}

/// A named execution context.
///
/// Cloning is shallow: clones share identity, compared with [`PartialEq`].
/// Two custom queues are distinct identities even with equal labels.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .field("available", &self.is_available())
            .finish()
    }
}

static MAIN: OnceLock<Queue> = OnceLock::new();
static GLOBALS: [OnceLock<Queue>; 5] = [
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
    OnceLock::new(),
];

fn default_width() -> usize {
    thread::available_parallelism()
        .map_or(2, NonZeroUsize::get)
        .max(2)
}

impl Queue {
    /// The process-wide main queue: always serial, always the same
    /// identity.
    ///
    /// In a host application this would be the UI run loop; here it is a
    /// dedicated single worker thread standing in for one.
    #[must_use]
    pub fn main() -> Queue {
        MAIN.get_or_init(|| {
            let pool = WorkerPool::new("main", 1);
            Queue::from_parts(
                "main".to_string(),
                QueueKind::Main,
                Arc::new(pool.clone()),
                Some(pool),
                true,
            )
        })
        .clone()
    }

    /// The process-wide concurrent queue for a QoS tier.
    #[must_use]
    pub fn global(qos: QosClass) -> Queue {
        GLOBALS[qos.index()]
            .get_or_init(|| {
                let pool = WorkerPool::new(qos.label(), default_width());
                Queue::from_parts(
                    qos.label().to_string(),
                    QueueKind::Global(qos),
                    Arc::new(pool.clone()),
                    Some(pool),
                    false,
                )
            })
            .clone()
    }

    /// Creates a serial custom queue with its own single-worker executor.
    #[must_use]
    pub fn serial(label: impl Into<String>) -> Queue {
        let label = label.into();
        let pool = WorkerPool::new(label.clone(), 1);
        Queue::from_parts(
            label,
            QueueKind::Custom { serial: true },
            Arc::new(pool.clone()),
            Some(pool),
            true,
        )
    }

    /// Creates a concurrent custom queue with its own worker pool.
    #[must_use]
    pub fn concurrent(label: impl Into<String>) -> Queue {
        let label = label.into();
        let pool = WorkerPool::new(label.clone(), default_width());
        Queue::from_parts(
            label,
            QueueKind::Custom { serial: false },
            Arc::new(pool.clone()),
            Some(pool),
            false,
        )
    }

    /// Creates a serial custom queue whose work runs on `target`'s
    /// executor, inheriting its effective priority. The new queue stays
    /// serial regardless of how wide the target is.
    #[must_use]
    pub fn serial_with_target(label: impl Into<String>, target: &Queue) -> Queue {
        Queue::from_parts(
            label.into(),
            QueueKind::Custom { serial: true },
            Arc::clone(&target.inner.executor),
            None,
            true,
        )
    }

    /// Creates a concurrent custom queue whose work runs on `target`'s
    /// executor.
    #[must_use]
    pub fn concurrent_with_target(label: impl Into<String>, target: &Queue) -> Queue {
        Queue::from_parts(
            label.into(),
            QueueKind::Custom { serial: false },
            Arc::clone(&target.inner.executor),
            None,
            false,
        )
    }

    fn from_parts(
        label: String,
        kind: QueueKind,
        executor: Arc<dyn Executor>,
        owned_pool: Option<WorkerPool>,
        serial: bool,
    ) -> Queue {
        Queue {
            inner: Arc::new(QueueInner {
                label,
                kind,
                executor,
                lane: serial.then(SerialLane::new),
                down: AtomicBool::new(false),
                owned_pool,
            }),
        }
    }

    /// The queue's label, for diagnostics.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether this queue runs at most one unit at a time.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        self.inner.lane.is_some()
    }

    /// Whether this queue still accepts submissions.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.inner.down.load(Ordering::Acquire)
    }

    /// Enqueues `work` and returns a handle to its eventual completion.
    pub fn submit<F>(&self, work: F) -> Result<TaskHandle, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = TaskInner::new();
        let completion = Arc::clone(&inner);
        self.submit_job(Box::new(move || {
            work();
            TaskInner::complete(&completion);
        }))?;
        Ok(TaskHandle::from_inner(inner))
    }

    /// Enqueues `work` to run after `delay`, returning a completion
    /// handle immediately.
    ///
    /// The delay is serviced by a shared timer thread; if this queue is
    /// shut down before the delay elapses, the work is dropped with a
    /// warning and the handle still completes.
    pub fn submit_after<F>(&self, delay: Duration, work: F) -> Result<TaskHandle, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_available() {
            return Err(DispatchError::ContextUnavailable {
                label: self.inner.label.clone(),
            });
        }
        let inner = TaskInner::new();
        let notification = Notification {
            queue: self.clone(),
            work: Box::new(work),
            settle: Some(Arc::clone(&inner)),
        };
        timer::schedule_after(delay, Box::new(move || notification.dispatch()));
        Ok(TaskHandle::from_inner(inner))
    }

    /// Runs `work(i)` for every `i` in `[0, iterations)`, distributing
    /// iterations across this queue's executor, and blocks the calling
    /// thread until all of them have completed.
    ///
    /// On a serial queue the iterations run sequentially in index order;
    /// on a concurrent queue their ordering is unspecified. Calling this
    /// from a job already running on the same serial queue deadlocks, the
    /// same way any blocking wait on one's own queue does.
    pub fn apply<F>(&self, iterations: usize, work: F) -> Result<(), DispatchError>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if iterations == 0 {
            return Ok(());
        }
        let group = Group::new();
        let work = Arc::new(work);
        let mut result = Ok(());
        for index in 0..iterations {
            let work = Arc::clone(&work);
            group.enter();
            let completion = group.clone();
            let submitted = self.submit_job(Box::new(move || {
                work(index);
                completion.leave();
            }));
            if let Err(err) = submitted {
                // The job never ran; rebalance and stop submitting.
                let _ = group.try_leave();
                result = Err(err);
                break;
            }
        }
        group.wait();
        result
    }

    /// Tears down a custom queue's executor resource.
    ///
    /// Later submissions fail with
    /// [`DispatchError::ContextUnavailable`]. Jobs already enqueued still
    /// run. Well-known queues live for the process lifetime and ignore
    /// this.
    pub fn shutdown(&self) {
        match self.inner.kind {
            QueueKind::Main | QueueKind::Global(_) => {
                tracing::trace!(queue = %self.inner.label, "ignoring shutdown of well-known queue");
            }
            QueueKind::Custom { .. } => {
                self.inner.down.store(true, Ordering::Release);
                if let Some(pool) = &self.inner.owned_pool {
                    pool.shutdown();
                }
                tracing::debug!(queue = %self.inner.label, "queue shut down");
            }
        }
    }

    /// Low-level submission shared by handles, groups, and the timer.
    pub(crate) fn submit_job(&self, job: Job) -> Result<(), DispatchError> {
        if !self.is_available() {
            return Err(DispatchError::ContextUnavailable {
                label: self.inner.label.clone(),
            });
        }
        tracing::trace!(queue = %self.inner.label, "submitting job");
        match &self.inner.lane {
            Some(lane) => {
                if lane.push(job) {
                    let inner = Arc::clone(&self.inner);
                    self.inner.executor.schedule(Box::new(move || {
                        let lane = inner.lane.as_ref().expect("serial lane missing");
                        while let Some(job) = lane.next() {
                            job();
                        }
                    }));
                }
            }
            None => self.inner.executor.schedule(job),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Semaphore;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn main_queue_is_a_serial_singleton() {
        let a = Queue::main();
        let b = Queue::main();
        assert_eq!(a, b);
        assert!(a.is_serial());
    }

    #[test]
    fn custom_queues_are_distinct_even_with_equal_labels() {
        let a = Queue::serial("same");
        let b = Queue::serial("same");
        assert_ne!(a, b);
        assert_eq!(a.label(), b.label());
    }

    #[test]
    fn global_queues_are_per_tier_singletons() {
        for qos in QosClass::ALL {
            assert_eq!(Queue::global(qos), Queue::global(qos));
            assert!(!Queue::global(qos).is_serial());
        }
        assert_ne!(
            Queue::global(QosClass::Default),
            Queue::global(QosClass::Background)
        );
    }

    #[test]
    fn serial_queue_never_overlaps_units() {
        let queue = Queue::serial("overlap-serial");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..16 {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(
                queue
                    .submit(move || {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.wait();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn serial_queue_on_concurrent_target_stays_serial() {
        let target = Queue::concurrent("wide-target");
        let queue = Queue::serial_with_target("narrow", &target);
        assert!(queue.is_serial());

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let order = Arc::clone(&order);
            handles.push(queue.submit(move || order.lock().unwrap().push(i)).unwrap());
        }
        for handle in handles {
            handle.wait();
        }
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_queue_permits_overlap() {
        let queue = Queue::concurrent("overlap-concurrent");
        // Two units that each block until the other has started can only
        // finish if the queue runs them concurrently.
        let first_started = Arc::new(Semaphore::new(0));
        let second_started = Arc::new(Semaphore::new(0));

        let (fs, ss) = (Arc::clone(&first_started), Arc::clone(&second_started));
        let a = queue
            .submit(move || {
                fs.signal();
                ss.wait();
            })
            .unwrap();
        let b = queue
            .submit(move || {
                second_started.signal();
                first_started.wait();
            })
            .unwrap();

        assert!(a.wait_timeout(Duration::from_secs(5)));
        assert!(b.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn apply_blocks_until_every_index_ran_once() {
        let queue = Queue::concurrent("apply");
        let counts: Arc<Vec<AtomicUsize>> =
            Arc::new((0..5).map(|_| AtomicUsize::new(0)).collect());
        let counts_clone = Arc::clone(&counts);
        queue
            .apply(5, move |i| {
                counts_clone[i].fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        for count in counts.iter() {
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn apply_on_serial_queue_runs_in_index_order() {
        let queue = Queue::serial("apply-serial");
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        queue
            .apply(6, move |i| order_clone.lock().unwrap().push(i))
            .unwrap();
        assert_eq!(*order.lock().unwrap(), (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn serial_queue_keeps_serving_after_a_panicking_unit() {
        let queue = Queue::serial("panic-serial");
        // The panicking unit's own handle never settles, but the queue's
        // single worker must survive to run what comes after.
        let _poisoned = queue.submit(|| panic!("intentional panic")).unwrap();
        let follow = queue.submit(|| {}).unwrap();
        assert!(follow.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn submit_to_shut_down_queue_fails() {
        let queue = Queue::serial("doomed");
        queue.shutdown();
        let err = queue.submit(|| {}).unwrap_err();
        assert_eq!(
            err,
            DispatchError::ContextUnavailable {
                label: "doomed".to_string()
            }
        );
        assert!(queue.apply(3, |_| {}).is_err());
    }

    #[test]
    fn shutdown_of_well_known_queues_is_ignored() {
        let global = Queue::global(QosClass::Utility);
        global.shutdown();
        assert!(global.is_available());
        global.submit(|| {}).unwrap().wait();
    }

    #[test]
    fn submit_after_delays_execution() {
        let queue = Queue::serial("delayed");
        let start = std::time::Instant::now();
        let handle = queue
            .submit_after(Duration::from_millis(40), || {})
            .unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
