//! The seam between queues and whatever actually runs submitted work.
//!
//! A [`Queue`](crate::Queue) never touches OS threads directly; it holds an
//! opaque [`Executor`] and hands it boxed jobs. The default implementation
//! is [`WorkerPool`](crate::pool::WorkerPool), but hosts with their own
//! thread management can supply anything that runs jobs eventually.

/// A unit of work, boxed for the executor boundary.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something capable of running submitted jobs.
///
/// Implementations must eventually run every scheduled job exactly once,
/// possibly concurrently with other jobs. Serialization is the queue's
/// responsibility, not the executor's: a serial queue drains its own FIFO
/// one job at a time regardless of how wide the executor is.
pub trait Executor: Send + Sync {
    /// Schedules `job` to run as soon as a worker is available.
    fn schedule(&self, job: Job);
}
