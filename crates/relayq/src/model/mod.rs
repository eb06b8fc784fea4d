//! Durable data model: [`Job`], [`JobEvent`], [`Waitpoint`], [`CronSchedule`]
//! and the small value types that describe how they're queried and edited.
//!
//! These types are storage-agnostic: they're what flows across the
//! [`Backend`](crate::backend::Backend) trait boundary, not a particular
//! SQL row shape. `relayq-postgres` maps them onto columns; `MemoryBackend`
//! keeps them as-is behind a lock.

mod cron_schedule;
mod event;
mod filter;
mod job;
mod retry;
mod tags;
mod waitpoint;

pub use cron_schedule::{CronSchedule, CronScheduleEdit, CronScheduleSpec, CronStatus};
pub use event::{EventType, JobEvent};
pub use filter::{JobFilter, RunAtFilter};
pub use job::{EnqueueOptions, ErrorEntry, FailureReason, Job, JobEdit, JobId, JobStatus};
pub use retry::{BackoffKind, RetryPolicy};
pub use tags::TagQueryMode;
pub use waitpoint::{Waitpoint, WaitpointId, WaitpointStatus};
