//! Error taxonomy for the queue engine.
//!
//! Configuration errors are raised synchronously and never persisted (see
//! the error handling design in the crate's top-level docs). Everything a
//! `Backend` implementation can fail with is wrapped in
//! [`QueueError::Backend`] rather than given its own variant, since the
//! engine is written against the abstract `Backend` contract and must not
//! assume a particular storage engine's error shape.

use thiserror::Error;

use crate::model::JobId;

/// Top-level error type returned by the queue façade, processor, and
/// supervisor.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A synchronous configuration mistake: invalid cron expression,
    /// non-positive wait duration, `groupConcurrency <= 0`, out-of-range
    /// progress, etc. Raised at the call site, never persisted to a job
    /// row.
    #[error("configuration error: {0}")]
    Config(String),

    /// A job id referenced by an operation does not exist.
    #[error("job {0} not found")]
    NotFound(JobId),

    /// A waitpoint id referenced by an operation does not exist.
    #[error("waitpoint {0} not found")]
    WaitpointNotFound(uuid::Uuid),

    /// A cron schedule id or name referenced by an operation does not
    /// exist.
    #[error("cron schedule {0} not found")]
    CronScheduleNotFound(String),

    /// The requested operation is not valid from the job's current status
    /// (e.g. editing a `processing` job).
    #[error("cannot {op} job {job_id} in its current state")]
    InvalidTransition { job_id: JobId, op: &'static str },

    /// A wrapped failure from the underlying `Backend` implementation
    /// (connection errors, constraint violations that aren't one of the
    /// above, etc).
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;
