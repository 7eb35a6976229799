//! Dispatchq: a lightweight dispatch layer over plain OS threads.
//!
//! # Overview
//!
//! Dispatchq provides named execution contexts ([`Queue`]), chained task
//! completion ([`TaskHandle`]), group-based aggregation of in-flight work
//! ([`Group`]), and counting semaphores ([`Semaphore`]). It does not try to
//! be a task-graph scheduler or a work-stealing runtime: work is submitted
//! to a queue, runs to completion on that queue's executor, and completion
//! fans out to registered follow-ups.
//!
//! # Core Guarantees
//!
//! - **No lost notifications**: a follow-up registered after its source has
//!   already completed is dispatched immediately rather than dropped
//! - **Exactly-once group completion**: a group's callback fires once per
//!   return-to-zero transition, never while work is outstanding
//! - **Serial means serial**: a serial queue never runs two units
//!   concurrently, even when it targets a concurrent executor
//! - **No silent clamping**: an unbalanced `leave()` fails loudly instead
//!   of driving the outstanding count negative
//!
//! # Module Structure
//!
//! - [`queue`]: Execution contexts (main, global QoS tiers, custom)
//! - [`task`]: Completion handles and `.notify` chaining
//! - [`group`]: Aggregated completion across independent units
//! - [`semaphore`]: Counting semaphore with blocking wait
//! - [`executor`]: The seam between queues and whatever runs the work
//! - [`pool`]: Default worker-pool executor
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```ignore
//! use dispatchq::{Group, Queue};
//!
//! let queue = Queue::concurrent("images");
//! let group = Group::new();
//! group.launch(&queue, || decode_header())?
//!      .launch(&queue, || decode_body())?
//!      .notify(&Queue::main(), || render());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod executor;
pub mod group;
pub mod pool;
pub mod queue;
pub mod semaphore;
pub mod task;
mod timer;

pub use error::DispatchError;
pub use executor::{Executor, Job};
pub use group::Group;
pub use pool::{WorkerPool, WorkerPoolOptions};
pub use queue::{QosClass, Queue};
pub use semaphore::Semaphore;
pub use task::TaskHandle;
