//! Error types for the dispatch layer.
//!
//! Errors here are local to the offending call; there is no global error
//! channel. A timeout on a blocking wait is a normal outcome reported as a
//! boolean, not an error. A panic inside submitted work is contained by
//! the default worker pool so the queue keeps serving, but it is not
//! surfaced to the submitter: the panicked unit's completion never
//! settles, and anything waiting on it specifically will wait forever.

use thiserror::Error;

/// Errors surfaced by dispatch operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// Work was submitted to a queue whose executor has been torn down.
    ///
    /// Not retried automatically; the queue stays unavailable for the rest
    /// of its life.
    #[error("queue \"{label}\" is unavailable: its executor has been shut down")]
    ContextUnavailable {
        /// Label of the queue the submission targeted.
        label: String,
    },

    /// `leave()` was called more times than matching `enter()` calls.
    ///
    /// Returned by [`Group::try_leave`](crate::Group::try_leave); the plain
    /// [`Group::leave`](crate::Group::leave) panics instead, since an
    /// unbalanced leave means some group already fired its completion
    /// prematurely and silently clamping would mask that.
    #[error("group leave() without a matching enter()")]
    UnbalancedLeave,
}
