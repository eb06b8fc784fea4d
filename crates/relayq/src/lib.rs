//! # RelayQ
//!
//! A durable background job engine backed by a relational store. Clients
//! enqueue typed work items; one or more [`Processor`] instances claim,
//! execute, retry, and retire them with at-least-once semantics.
//!
//! Four subsystems carry the hard engineering, all coordinating exclusively
//! through the abstract [`Backend`](backend::Backend) — this crate never
//! assumes there's only one process talking to the store:
//!
//! 1. The claim-and-advance state machine over persisted job rows
//!    (priority, scheduling, retry-with-backoff, visibility leases, stuck-job
//!    reclamation) — [`backend`].
//! 2. Per-job execution control: cooperative timeouts with dynamic
//!    extension, heartbeat prolongation, forced termination via an isolated
//!    worker — [`handler`].
//! 3. Durable resumable workflows: memoized steps and suspend/resume
//!    waitpoints, implemented by replaying the handler across invocations —
//!    [`orchestrator`].
//! 4. Cron scheduling with overlap suppression — [`cron_hook`], built on the
//!    timezone-aware evaluator in the sibling `relayq-cron` crate.
//!
//! [`Processor`] and [`Supervisor`] are the two background loops a
//! deployment runs; [`Queue`] is the thin façade everything else (an HTTP
//! boundary, an admin CLI, whatever the caller bolts on — none of which is
//! this crate's concern) talks to.
//!
//! Non-goals: exactly-once execution, distributed consensus between
//! processors (coordination is entirely via the store's row-level
//! locking), delivery ordering across priorities within the same
//! `(priority, enqueue_time)` tuple, and transactional guarantees
//! spanning a handler body.

pub mod backend;
mod cron_hook;
pub mod duration;
pub mod error;
pub mod handler;
pub mod model;
pub mod orchestrator;
mod processor;
mod queue;
mod supervisor;

pub use backend::{Backend, JobTypeFilter};
pub use cron_hook::enqueue_due_cron_jobs;
pub use duration::WaitDuration;
pub use error::{QueueError, QueueResult};
pub use handler::{AbortSignal, Handler, HandlerRegistry, IsolatableHandler, JobContext};
pub use orchestrator::{OrchestratorSignal, TokenResult, WaitRequest};
pub use processor::{Processor, ProcessorOptions};
pub use queue::{AddCronJobOptions, AddJobOptions, Queue};
pub use supervisor::{Supervisor, SupervisorOptions};

pub use relayq_cron::{get_next_occurrence, validate_cron_expression, CronError};
