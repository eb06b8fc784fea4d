//! The Queue API façade: a thin `Arc<dyn Backend>` wrapper exposing
//! named job/cron operations as inherent async methods, plus the two
//! factory entry points (`create_processor`, `create_supervisor`).
//! Everything here is policy-light — validation of synchronous
//! configuration errors and translation between the façade's
//! convenience option structs and the `Backend` trait's input types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::{Backend, Page};
use crate::error::{QueueError, QueueResult};
use crate::handler::HandlerRegistry;
use crate::model::{
    CronSchedule, CronScheduleEdit, CronScheduleSpec, CronStatus, EnqueueOptions, JobEdit,
    JobEvent, JobFilter, JobId, JobStatus, RetryPolicy, TagQueryMode, Waitpoint, WaitpointId,
};
use crate::processor::{Processor, ProcessorOptions};
use crate::supervisor::{Supervisor, SupervisorOptions};
use crate::WaitDuration;

/// Inputs to [`Queue::add_job`]. Mirrors
/// [`EnqueueOptions`](crate::model::EnqueueOptions) but with the defaults a
/// caller typically wants spelled out via `Default`.
#[derive(Debug, Clone)]
pub struct AddJobOptions {
    pub job_type: String,
    pub payload: Value,
    pub priority: i32,
    pub run_at: Option<DateTime<Utc>>,
    pub timeout_ms: Option<i64>,
    pub force_kill_on_timeout: bool,
    pub max_attempts: i32,
    pub tags: Vec<String>,
    pub idempotency_key: Option<String>,
    pub retry_policy: RetryPolicy,
}

impl AddJobOptions {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: 0,
            run_at: None,
            timeout_ms: None,
            force_kill_on_timeout: false,
            max_attempts: 3,
            tags: Vec::new(),
            idempotency_key: None,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Inputs to [`Queue::add_cron_job`].
#[derive(Debug, Clone)]
pub struct AddCronJobOptions {
    pub schedule_name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub job_type: String,
    pub payload: Value,
    pub max_attempts: i32,
    pub priority: i32,
    pub timeout_ms: Option<i64>,
    pub force_kill_on_timeout: bool,
    pub tags: Vec<String>,
    pub retry_policy: RetryPolicy,
    pub allow_overlap: bool,
}

/// The in-process API surface. Construct with [`Queue::new`] over any
/// `Arc<dyn Backend>` — the in-memory one for tests/single-node
/// deployments, `relayq-postgres::PgBackend` for production.
#[derive(Clone)]
pub struct Queue {
    backend: Arc<dyn Backend>,
}

impl Queue {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    // ---- Jobs --------------------------------------------------------

    pub async fn add_job(&self, opts: AddJobOptions) -> QueueResult<JobId> {
        let run_at = opts.run_at.unwrap_or_else(Utc::now);
        let enqueue = EnqueueOptions {
            job_type: opts.job_type,
            payload: opts.payload,
            priority: opts.priority,
            run_at,
            timeout_ms: opts.timeout_ms,
            force_kill_on_timeout: opts.force_kill_on_timeout,
            max_attempts: opts.max_attempts,
            tags: opts.tags,
            idempotency_key: opts.idempotency_key,
            retry_policy: opts.retry_policy,
        };
        self.backend.enqueue(enqueue).await.map_err(QueueError::Backend)
    }

    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<crate::model::Job>> {
        self.backend.get_job(id).await.map_err(QueueError::Backend)
    }

    pub async fn get_jobs(&self, filter: &JobFilter, limit: i64, offset: i64) -> QueueResult<Page<crate::model::Job>> {
        self.backend.get_jobs(filter, limit, offset).await.map_err(QueueError::Backend)
    }

    pub async fn get_jobs_by_status(
        &self,
        status: JobStatus,
        limit: i64,
        offset: i64,
    ) -> QueueResult<Page<crate::model::Job>> {
        self.backend.get_jobs_by_status(status, limit, offset).await.map_err(QueueError::Backend)
    }

    pub async fn get_jobs_by_tags(
        &self,
        values: &[String],
        mode: TagQueryMode,
        limit: i64,
        offset: i64,
    ) -> QueueResult<Page<crate::model::Job>> {
        self.backend.get_jobs_by_tags(values, mode, limit, offset).await.map_err(QueueError::Backend)
    }

    pub async fn get_all_jobs(&self, limit: i64, offset: i64) -> QueueResult<Page<crate::model::Job>> {
        self.backend.get_all_jobs(limit, offset).await.map_err(QueueError::Backend)
    }

    pub async fn retry_job(&self, id: JobId) -> QueueResult<()> {
        self.backend.retry(id).await.map_err(QueueError::Backend)
    }

    pub async fn cancel_job(&self, id: JobId) -> QueueResult<()> {
        self.backend.cancel(id).await.map_err(QueueError::Backend)
    }

    pub async fn cancel_all_upcoming_jobs(&self, filter: &JobFilter) -> QueueResult<u64> {
        self.backend.bulk_cancel(filter).await.map_err(QueueError::Backend)
    }

    pub async fn edit_job(&self, id: JobId, updates: JobEdit) -> QueueResult<()> {
        self.backend.edit(id, updates).await.map_err(QueueError::Backend)
    }

    pub async fn edit_all_pending_jobs(&self, filter: &JobFilter, updates: JobEdit) -> QueueResult<u64> {
        self.backend.bulk_edit(filter, updates).await.map_err(QueueError::Backend)
    }

    pub async fn cleanup_old_jobs(&self, days: i64, batch_size: Option<i64>) -> QueueResult<u64> {
        self.backend.cleanup_old_jobs(days, batch_size.unwrap_or(1_000)).await.map_err(QueueError::Backend)
    }

    pub async fn cleanup_old_job_events(&self, days: i64, batch_size: Option<i64>) -> QueueResult<u64> {
        self.backend.cleanup_old_job_events(days, batch_size.unwrap_or(1_000)).await.map_err(QueueError::Backend)
    }

    pub async fn reclaim_stuck_jobs(&self, minutes: i64) -> QueueResult<u64> {
        self.backend.reclaim_stuck_jobs(minutes).await.map_err(QueueError::Backend)
    }

    pub async fn get_job_events(&self, id: JobId) -> QueueResult<Page<JobEvent>> {
        self.backend.get_job_events(id, i64::MAX, 0).await.map_err(QueueError::Backend)
    }

    // ---- Waitpoints / tokens -------------------------------------------

    pub async fn create_token(&self, timeout: Option<WaitDuration>, tags: Vec<String>) -> QueueResult<Waitpoint> {
        let timeout_at = match timeout {
            Some(d) => Some(d.from_now(Utc::now())?),
            None => None,
        };
        self.backend.create_waitpoint(None, timeout_at, tags).await.map_err(QueueError::Backend)
    }

    pub async fn complete_token(&self, id: WaitpointId, output: Option<Value>) -> QueueResult<()> {
        self.backend.complete_waitpoint(id, output).await.map_err(QueueError::Backend)
    }

    pub async fn get_token(&self, id: WaitpointId) -> QueueResult<Option<Waitpoint>> {
        self.backend.get_waitpoint(id).await.map_err(QueueError::Backend)
    }

    pub async fn expire_timed_out_tokens(&self) -> QueueResult<u64> {
        self.backend.expire_timed_out_waitpoints().await.map_err(QueueError::Backend)
    }

    // ---- Cron schedules -------------------------------------------------

    pub async fn add_cron_job(&self, opts: AddCronJobOptions) -> QueueResult<CronSchedule> {
        if !relayq_cron::validate_cron_expression(&opts.cron_expression) {
            return Err(QueueError::Config(format!("invalid cron expression `{}`", opts.cron_expression)));
        }
        let next_run_at = relayq_cron::get_next_occurrence(&opts.cron_expression, &opts.timezone, Utc::now())
            .map_err(|e| QueueError::Config(e.to_string()))?;

        let spec = CronScheduleSpec {
            schedule_name: opts.schedule_name,
            cron_expression: opts.cron_expression,
            timezone: opts.timezone,
            job_type: opts.job_type,
            payload: opts.payload,
            max_attempts: opts.max_attempts,
            priority: opts.priority,
            timeout_ms: opts.timeout_ms,
            force_kill_on_timeout: opts.force_kill_on_timeout,
            tags: opts.tags,
            retry_policy: opts.retry_policy,
            allow_overlap: opts.allow_overlap,
            next_run_at,
        };
        self.backend.add_cron_schedule(spec).await.map_err(QueueError::Backend)
    }

    pub async fn get_cron_job(&self, id: i64) -> QueueResult<Option<CronSchedule>> {
        self.backend.get_cron_schedule(id).await.map_err(QueueError::Backend)
    }

    pub async fn get_cron_job_by_name(&self, name: &str) -> QueueResult<Option<CronSchedule>> {
        self.backend.get_cron_schedule_by_name(name).await.map_err(QueueError::Backend)
    }

    pub async fn list_cron_jobs(&self, status: Option<CronStatus>) -> QueueResult<Vec<CronSchedule>> {
        self.backend.list_cron_schedules(status).await.map_err(QueueError::Backend)
    }

    pub async fn pause_cron_job(&self, id: i64) -> QueueResult<()> {
        self.backend.pause_cron_schedule(id).await.map_err(QueueError::Backend)
    }

    pub async fn resume_cron_job(&self, id: i64) -> QueueResult<()> {
        self.backend.resume_cron_schedule(id).await.map_err(QueueError::Backend)
    }

    pub async fn remove_cron_job(&self, id: i64) -> QueueResult<()> {
        self.backend.remove_cron_schedule(id).await.map_err(QueueError::Backend)
    }

    /// Applies `updates` to the named cron schedule, recomputing
    /// `next_run_at` whenever `cron_expression` or `timezone` changes.
    pub async fn edit_cron_job(&self, id: i64, mut updates: CronScheduleEdit) -> QueueResult<CronSchedule> {
        if updates.cron_expression.is_some() || updates.timezone.is_some() {
            let current = self
                .backend
                .get_cron_schedule(id)
                .await
                .map_err(QueueError::Backend)?
                .ok_or_else(|| QueueError::CronScheduleNotFound(id.to_string()))?;

            let expr = updates.cron_expression.as_deref().unwrap_or(&current.cron_expression);
            let tz = updates.timezone.as_deref().unwrap_or(&current.timezone);
            if !relayq_cron::validate_cron_expression(expr) {
                return Err(QueueError::Config(format!("invalid cron expression `{expr}`")));
            }
            let next_run_at = relayq_cron::get_next_occurrence(expr, tz, Utc::now())
                .map_err(|e| QueueError::Config(e.to_string()))?;
            updates.next_run_at = Some(next_run_at);
        }
        self.backend.edit_cron_schedule(id, updates).await.map_err(QueueError::Backend)
    }

    /// Manual trigger for the cron-enqueue hook the `Processor` runs at the
    /// head of each cycle.
    pub async fn enqueue_due_cron_jobs(&self) -> QueueResult<u64> {
        crate::cron_hook::enqueue_due_cron_jobs(self.backend.as_ref()).await.map_err(QueueError::Backend)
    }

    // ---- Factories -------------------------------------------------------

    pub fn create_processor(&self, handlers: HandlerRegistry, options: ProcessorOptions) -> QueueResult<Processor> {
        Processor::new(self.backend.clone(), handlers, options)
    }

    pub fn create_supervisor(&self, options: SupervisorOptions) -> Supervisor {
        Supervisor::new(self.backend.clone(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    #[tokio::test]
    async fn add_job_defaults_run_at_to_now() {
        let queue = Queue::new(Arc::new(MemoryBackend::new()));
        let id = queue.add_job(AddJobOptions::new("t", Value::Null)).await.unwrap();
        let job = queue.get_job(id).await.unwrap().unwrap();
        assert!(job.run_at <= Utc::now());
    }

    #[tokio::test]
    async fn add_cron_job_rejects_invalid_expressions_synchronously() {
        let queue = Queue::new(Arc::new(MemoryBackend::new()));
        let err = queue
            .add_cron_job(AddCronJobOptions {
                schedule_name: "bad".to_string(),
                cron_expression: "not a cron".to_string(),
                timezone: "UTC".to_string(),
                job_type: "t".to_string(),
                payload: Value::Null,
                max_attempts: 3,
                priority: 0,
                timeout_ms: None,
                force_kill_on_timeout: false,
                tags: vec![],
                retry_policy: RetryPolicy::default(),
                allow_overlap: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[tokio::test]
    async fn add_cron_job_computes_next_run_at() {
        let queue = Queue::new(Arc::new(MemoryBackend::new()));
        let schedule = queue
            .add_cron_job(AddCronJobOptions {
                schedule_name: "digest".to_string(),
                cron_expression: "*/5 * * * *".to_string(),
                timezone: "UTC".to_string(),
                job_type: "send-digest".to_string(),
                payload: Value::Null,
                max_attempts: 3,
                priority: 0,
                timeout_ms: None,
                force_kill_on_timeout: false,
                tags: vec![],
                retry_policy: RetryPolicy::default(),
                allow_overlap: true,
            })
            .await
            .unwrap();
        assert!(schedule.next_run_at > Utc::now());
    }
}
