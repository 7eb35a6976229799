//! Default worker-pool executor.
//!
//! A [`WorkerPool`] runs jobs on a bounded set of OS threads. Threads are
//! spawned lazily up to `width` as work arrives and retired again after an
//! idle timeout, so an idle pool costs nothing but its queue.
//!
//! The pool makes no ordering promises beyond FIFO dequeue: two jobs may
//! run concurrently whenever `width > 1`. Serial queues get serialization
//! from their own drain lane, not from the pool.

use crossbeam_queue::SegQueue;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crate::executor::{Executor, Job};

/// Default idle timeout before retiring a parked worker.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// A pool of worker threads implementing [`Executor`].
///
/// Cloning is shallow; all clones schedule onto the same threads.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("width", &self.inner.width)
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field(
                "pending_jobs",
                &self.inner.pending_count.load(Ordering::Relaxed),
            )
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

struct PoolInner {
    /// Thread name prefix, also used in log events.
    name: String,
    /// Maximum number of worker threads.
    width: usize,
    /// Current number of live threads.
    active_threads: AtomicUsize,
    /// Number of threads currently executing a job.
    busy_threads: AtomicUsize,
    /// Number of jobs waiting in the queue.
    pending_count: AtomicUsize,
    /// Work queue.
    queue: SegQueue<Job>,
    /// Shutdown flag; once set, no new jobs are accepted by the owner.
    shutdown: AtomicBool,
    /// Condition variable for thread parking.
    condvar: Condvar,
    /// Mutex for the condition variable.
    mutex: Mutex<()>,
    /// Idle timeout before a parked worker retires.
    idle_timeout: Duration,
}

/// Configuration options for a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    /// Idle timeout before retiring a parked worker.
    pub idle_timeout: Duration,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl WorkerPool {
    /// Creates a pool that runs at most `width` jobs concurrently.
    ///
    /// `name` becomes the worker thread name prefix. No threads are
    /// spawned until the first job arrives.
    ///
    /// # Panics
    ///
    /// Panics if `width` is 0.
    #[must_use]
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self::with_options(name, width, WorkerPoolOptions::default())
    }

    /// Creates a pool with custom options.
    #[must_use]
    pub fn with_options(name: impl Into<String>, width: usize, options: WorkerPoolOptions) -> Self {
        assert!(width > 0, "pool width must be at least 1");
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                width,
                active_threads: AtomicUsize::new(0),
                busy_threads: AtomicUsize::new(0),
                pending_count: AtomicUsize::new(0),
                queue: SegQueue::new(),
                shutdown: AtomicBool::new(false),
                condvar: Condvar::new(),
                mutex: Mutex::new(()),
                idle_timeout: options.idle_timeout,
            }),
        }
    }

    /// Returns the number of jobs waiting in the queue.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::Relaxed)
    }

    /// Returns the number of live worker threads.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Relaxed)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Initiates shutdown.
    ///
    /// Jobs already queued still run; workers exit once the queue drains.
    /// Scheduling after shutdown is the caller's contract violation — the
    /// queue layer guards for it before reaching the pool.
    pub fn shutdown(&self) {
        tracing::debug!(pool = %self.inner.name, "worker pool shutting down");
        self.inner.shutdown.store(true, Ordering::Release);
        let _guard = self.inner.mutex.lock().expect("pool mutex poisoned");
        self.inner.condvar.notify_all();
    }

    /// Shuts down and blocks until every worker has exited or `timeout`
    /// elapses. Returns whether all workers exited.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        let deadline = std::time::Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            {
                let _guard = self.inner.mutex.lock().expect("pool mutex poisoned");
                self.inner.condvar.notify_all();
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }
        true
    }

    fn maybe_spawn_thread(&self) {
        maybe_spawn_on(&self.inner);
    }
}

impl Executor for WorkerPool {
    fn schedule(&self, job: Job) {
        self.inner.queue.push(job);
        self.inner.pending_count.fetch_add(1, Ordering::SeqCst);
        self.maybe_spawn_thread();
        let _guard = self.inner.mutex.lock().expect("pool mutex poisoned");
        self.inner.condvar.notify_one();
    }
}

fn maybe_spawn_on(inner: &Arc<PoolInner>) {
    let active = inner.active_threads.load(Ordering::SeqCst);
    let busy = inner.busy_threads.load(Ordering::SeqCst);
    let pending = inner.pending_count.load(Ordering::SeqCst);

    // Spawn only when below width, all live threads are occupied, and
    // there is work to pick up.
    if active < inner.width && busy >= active && pending > 0 {
        spawn_worker(inner);
    }
}

/// Keeps the live-thread count honest on every worker exit path.
///
/// Dropping decrements `active_threads` and, if work is still queued on a
/// pool that is not shutting down, spawns a replacement. That rescues a
/// job that raced a retirement decision, and restores capacity should a
/// worker ever die by unwinding.
struct WorkerExitGuard<'a> {
    inner: &'a Arc<PoolInner>,
}

impl Drop for WorkerExitGuard<'_> {
    fn drop(&mut self) {
        self.inner.active_threads.fetch_sub(1, Ordering::SeqCst);
        if !self.inner.shutdown.load(Ordering::Acquire) {
            maybe_spawn_on(self.inner);
        }
    }
}

fn spawn_worker(inner: &Arc<PoolInner>) {
    let inner_clone = Arc::clone(inner);
    let thread_id = inner.active_threads.fetch_add(1, Ordering::SeqCst);
    let name = format!("{}-worker-{}", inner.name, thread_id);
    tracing::debug!(pool = %inner.name, thread = %name, "spawning worker");

    let spawned = thread::Builder::new().name(name).spawn(move || {
        let _exit = WorkerExitGuard {
            inner: &inner_clone,
        };
        worker_loop(&inner_clone);
    });
    if spawned.is_err() {
        // Undo the count; queued work will be picked up by an existing
        // worker or a later spawn attempt.
        inner.active_threads.fetch_sub(1, Ordering::SeqCst);
        tracing::warn!(pool = %inner.name, "failed to spawn worker thread");
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending_count.fetch_sub(1, Ordering::SeqCst);
            inner.busy_threads.fetch_add(1, Ordering::SeqCst);
            // Contain a panicking job so one bad closure cannot take the
            // worker (and on a width-1 pool, the whole queue) with it.
            let outcome = catch_unwind(AssertUnwindSafe(job));
            inner.busy_threads.fetch_sub(1, Ordering::SeqCst);
            if outcome.is_err() {
                tracing::warn!(pool = %inner.name, "job panicked; worker continues");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        // Park with timeout; retire if still idle afterwards. Re-check the
        // queue under the lock so a push racing the park is not missed.
        let guard = inner.mutex.lock().expect("pool mutex poisoned");
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        let (_guard, timeout) = inner
            .condvar
            .wait_timeout(guard, inner.idle_timeout)
            .expect("pool mutex poisoned");
        if timeout.timed_out() && inner.queue.is_empty() {
            tracing::debug!(pool = %inner.name, "retiring idle worker");
            break;
        }
    }
}
