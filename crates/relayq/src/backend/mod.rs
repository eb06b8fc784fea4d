//! The abstract durable store contract.
//!
//! `Backend` is written the way `seesaw`'s `JobStore` trait is: a narrow,
//! `#[async_trait]`, object-safe surface that a storage engine implements
//! once and the rest of the crate depends on exclusively through `dyn
//! Backend`. Every method here is a *mandatory behavior*, not an
//! implementation hint — in particular, claim atomicity and the
//! compare-and-swap shape of `update_cron_schedule_after_enqueue` are part
//! of the contract, not PostgreSQL-specific detail.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{
    CronSchedule, CronScheduleEdit, CronScheduleSpec, EnqueueOptions, FailureReason, Job, JobEdit,
    JobEvent, JobFilter, JobId, JobStatus, TagQueryMode, Waitpoint, WaitpointId,
};

/// `claim_batch`'s optional job-type restriction: a single type, a set of
/// types, or no restriction at all.
#[derive(Debug, Clone)]
pub enum JobTypeFilter {
    Any,
    One(String),
    Set(Vec<String>),
}

impl JobTypeFilter {
    pub fn matches(&self, job_type: &str) -> bool {
        match self {
            JobTypeFilter::Any => true,
            JobTypeFilter::One(t) => t == job_type,
            JobTypeFilter::Set(set) => set.iter().any(|t| t == job_type),
        }
    }
}

/// A page of rows plus the information needed to determine whether another
/// exists; every listing method in this trait just returns `Vec<T>` sized
/// to `limit`, paginated by `offset`.
pub type Page<T> = Vec<T>;

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    // ---- Enqueue / lifecycle -------------------------------------------

    /// Returns the new job's id, or the id of the existing live row if
    /// `opts.idempotency_key` collides.
    async fn enqueue(&self, opts: EnqueueOptions) -> anyhow::Result<JobId>;

    /// Atomically claims up to `batch_size` eligible rows for `worker_id`,
    /// stamping the lease, `attempts`, `started_at`, and `last_retried_at`
    /// fields per the claim-and-advance rules.
    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        job_type: &JobTypeFilter,
    ) -> anyhow::Result<Vec<Job>>;

    async fn complete(&self, id: JobId) -> anyhow::Result<()>;

    async fn fail(&self, id: JobId, message: &str, reason: FailureReason) -> anyhow::Result<()>;

    /// `processing -> waiting`, storing the orchestrator's `step_data`.
    async fn wait(
        &self,
        id: JobId,
        wait_until: Option<DateTime<Utc>>,
        wait_token_id: Option<WaitpointId>,
        step_data: Value,
    ) -> anyhow::Result<()>;

    /// Heartbeat: refresh `locked_at` if still `processing`. Best-effort —
    /// implementations may return `Err`, but every caller in this crate
    /// swallows it.
    async fn prolong(&self, id: JobId) -> anyhow::Result<()>;

    async fn retry(&self, id: JobId) -> anyhow::Result<()>;

    async fn cancel(&self, id: JobId) -> anyhow::Result<()>;

    async fn edit(&self, id: JobId, updates: JobEdit) -> anyhow::Result<()>;

    async fn bulk_cancel(&self, filter: &JobFilter) -> anyhow::Result<u64>;

    async fn bulk_edit(&self, filter: &JobFilter, updates: JobEdit) -> anyhow::Result<u64>;

    async fn reclaim_stuck_jobs(&self, max_processing_minutes: i64) -> anyhow::Result<u64>;

    /// Persists `JobContext::set_progress`'s `n` onto the job row. Valid
    /// from any status; the Handler Runtime only calls this while the row
    /// is `processing`.
    async fn set_progress(&self, id: JobId, progress: i32) -> anyhow::Result<()>;

    /// Persists `step_data` without changing `status`, used by the
    /// Step/Wait Orchestrator's `ctx.run` to memoize a step's result as
    /// soon as it completes, ahead of whatever happens to the rest of the
    /// handler.
    async fn save_step_data(&self, id: JobId, step_data: Value) -> anyhow::Result<()>;

    /// Stamps `pending_reason` on every `pending` row of `job_type` as an
    /// observational hint for operators when no handler is registered for
    /// it. Returns the number of rows touched.
    async fn mark_no_handler(&self, job_type: &str, reason: &str) -> anyhow::Result<u64>;

    async fn cleanup_old_jobs(&self, older_than_days: i64, batch_size: i64) -> anyhow::Result<u64>;

    async fn cleanup_old_job_events(
        &self,
        older_than_days: i64,
        batch_size: i64,
    ) -> anyhow::Result<u64>;

    // ---- Events ----------------------------------------------------------

    /// Best-effort append. Implementations should never let a failure here
    /// propagate out of the caller's main transition; the `Processor` and
    /// `Queue` façade log-and-continue on `Err`.
    async fn record_event(
        &self,
        job_id: JobId,
        event_type: crate::model::EventType,
        metadata: Value,
    ) -> anyhow::Result<()>;

    async fn get_job_events(
        &self,
        job_id: JobId,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Page<JobEvent>>;

    // ---- Reads -------------------------------------------------------------

    async fn get_job(&self, id: JobId) -> anyhow::Result<Option<Job>>;

    async fn get_jobs(&self, filter: &JobFilter, limit: i64, offset: i64) -> anyhow::Result<Page<Job>>;

    async fn get_jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Page<Job>>;

    async fn get_jobs_by_tags(
        &self,
        values: &[String],
        mode: TagQueryMode,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Page<Job>>;

    async fn get_all_jobs(&self, limit: i64, offset: i64) -> anyhow::Result<Page<Job>>;

    // ---- Waitpoints --------------------------------------------------------

    async fn create_waitpoint(
        &self,
        job_id: Option<JobId>,
        timeout_at: Option<DateTime<Utc>>,
        tags: Vec<String>,
    ) -> anyhow::Result<Waitpoint>;

    /// Binds a free-standing waitpoint to the job suspended on it, so that
    /// completing or expiring the waitpoint later knows which job to
    /// requeue. No-op if the waitpoint is already bound to this job;
    /// overwrites a stale binding to a different job (the job that most
    /// recently suspended on the token is the one waiting on it now).
    async fn bind_waitpoint(&self, id: WaitpointId, job_id: JobId) -> anyhow::Result<()>;

    /// `waiting -> completed`. If the waitpoint is bound to a job
    /// (`job_id.is_some()`), this also eagerly requeues that job
    /// `waiting -> pending` with `run_at = now`, in the same logical
    /// operation, rather than leaving it idle until the next poll.
    async fn complete_waitpoint(&self, id: WaitpointId, output: Option<Value>) -> anyhow::Result<()>;

    async fn get_waitpoint(&self, id: WaitpointId) -> anyhow::Result<Option<Waitpoint>>;

    /// Marks every `waiting` row past `timeout_at` as `timed_out` and, for
    /// those bound to a job, requeues that job `waiting -> pending` with
    /// `run_at = now`. Returns the number of waitpoints expired.
    async fn expire_timed_out_waitpoints(&self) -> anyhow::Result<u64>;

    // ---- Cron schedules ------------------------------------------------------

    async fn add_cron_schedule(&self, spec: CronScheduleSpec) -> anyhow::Result<CronSchedule>;

    async fn get_cron_schedule(&self, id: i64) -> anyhow::Result<Option<CronSchedule>>;

    async fn get_cron_schedule_by_name(&self, name: &str) -> anyhow::Result<Option<CronSchedule>>;

    async fn list_cron_schedules(
        &self,
        status: Option<crate::model::CronStatus>,
    ) -> anyhow::Result<Vec<CronSchedule>>;

    async fn pause_cron_schedule(&self, id: i64) -> anyhow::Result<()>;

    async fn resume_cron_schedule(&self, id: i64) -> anyhow::Result<()>;

    async fn remove_cron_schedule(&self, id: i64) -> anyhow::Result<()>;

    async fn edit_cron_schedule(
        &self,
        id: i64,
        updates: CronScheduleEdit,
    ) -> anyhow::Result<CronSchedule>;

    async fn get_due_cron_schedules(&self) -> anyhow::Result<Vec<CronSchedule>>;

    /// Compare-and-swap: succeeds only if the schedule's `next_run_at` is
    /// still `observed_next_run_at` at the time of the update. Returns
    /// `true` if the row was updated, `false` if another processor had
    /// already advanced it.
    #[allow(clippy::too_many_arguments)]
    async fn update_cron_schedule_after_enqueue(
        &self,
        id: i64,
        observed_next_run_at: DateTime<Utc>,
        last_enqueued_at: DateTime<Utc>,
        last_job_id: Option<JobId>,
        next_run_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}
