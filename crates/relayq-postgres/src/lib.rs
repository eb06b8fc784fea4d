//! PostgreSQL implementation of the RelayQ [`Backend`](relayq::Backend).
//!
//! Claiming follows the same `FOR UPDATE SKIP LOCKED` CTE shape
//! `seesaw-job-postgres::PgJobStore::claim_ready` uses, generalized for
//! three claimable states instead of one (`pending`, `failed` past its
//! backoff, `waiting` past its timeout) and for the attempts/`started_at`/
//! `last_retried_at` stamping rules the claim-and-advance state machine
//! requires. Every other transition is a single `UPDATE ... WHERE status =
//! '<from>'` guarded on the expected source status, the same pattern
//! `mark_succeeded`/`mark_failed`/`heartbeat` use there.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id BIGSERIAL PRIMARY KEY,
//!     job_type TEXT NOT NULL,
//!     idempotency_key TEXT,
//!     tags TEXT[] NOT NULL DEFAULT '{}',
//!     payload JSONB NOT NULL,
//!
//!     priority INTEGER NOT NULL DEFAULT 0,
//!     run_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     next_attempt_at TIMESTAMPTZ,
//!
//!     timeout_ms BIGINT,
//!     force_kill_on_timeout BOOLEAN NOT NULL DEFAULT FALSE,
//!     max_attempts INTEGER NOT NULL DEFAULT 3,
//!     attempts INTEGER NOT NULL DEFAULT 0,
//!     retry_policy JSONB NOT NULL DEFAULT '{"backoff":"Exponential","retry_delay_ms":null,"retry_delay_max_ms":null}',
//!
//!     -- pending | processing | waiting | completed | failed | cancelled
//!     status TEXT NOT NULL DEFAULT 'pending',
//!
//!     locked_at TIMESTAMPTZ,
//!     locked_by TEXT,
//!     progress INTEGER,
//!     step_data JSONB NOT NULL DEFAULT '{}',
//!
//!     wait_until TIMESTAMPTZ,
//!     wait_token_id UUID,
//!
//!     error_history JSONB NOT NULL DEFAULT '[]',
//!     failure_reason TEXT,
//!     pending_reason TEXT,
//!
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     started_at TIMESTAMPTZ,
//!     completed_at TIMESTAMPTZ,
//!     last_failed_at TIMESTAMPTZ,
//!     last_retried_at TIMESTAMPTZ,
//!     last_cancelled_at TIMESTAMPTZ
//! );
//!
//! CREATE UNIQUE INDEX idx_jobs_idempotency_key ON jobs (idempotency_key)
//!     WHERE idempotency_key IS NOT NULL
//!       AND status NOT IN ('completed', 'cancelled')
//!       AND NOT (status = 'failed' AND attempts >= max_attempts);
//! CREATE INDEX idx_jobs_claimable ON jobs (priority DESC, created_at ASC)
//!     WHERE status IN ('pending', 'failed', 'waiting');
//! CREATE INDEX idx_jobs_locked_at ON jobs (locked_at) WHERE status = 'processing';
//!
//! CREATE TABLE job_events (
//!     id BIGSERIAL PRIMARY KEY,
//!     job_id BIGINT NOT NULL REFERENCES jobs (id) ON DELETE CASCADE,
//!     event_type TEXT NOT NULL,
//!     metadata JSONB NOT NULL DEFAULT 'null',
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX idx_job_events_job_id ON job_events (job_id, created_at);
//! CREATE INDEX idx_job_events_created_at ON job_events (created_at);
//!
//! CREATE TABLE waitpoints (
//!     id UUID PRIMARY KEY,
//!     job_id BIGINT REFERENCES jobs (id) ON DELETE SET NULL,
//!     status TEXT NOT NULL DEFAULT 'waiting',
//!     timeout_at TIMESTAMPTZ,
//!     completed_at TIMESTAMPTZ,
//!     output JSONB,
//!     tags TEXT[] NOT NULL DEFAULT '{}',
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX idx_waitpoints_timeout ON waitpoints (timeout_at) WHERE status = 'waiting';
//!
//! CREATE TABLE cron_schedules (
//!     id BIGSERIAL PRIMARY KEY,
//!     schedule_name TEXT NOT NULL UNIQUE,
//!     cron_expression TEXT NOT NULL,
//!     timezone TEXT NOT NULL,
//!     job_type TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     max_attempts INTEGER NOT NULL,
//!     priority INTEGER NOT NULL,
//!     timeout_ms BIGINT,
//!     force_kill_on_timeout BOOLEAN NOT NULL,
//!     tags TEXT[] NOT NULL DEFAULT '{}',
//!     retry_policy JSONB NOT NULL,
//!     allow_overlap BOOLEAN NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'active',
//!     last_enqueued_at TIMESTAMPTZ,
//!     last_job_id BIGINT,
//!     next_run_at TIMESTAMPTZ NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE INDEX idx_cron_schedules_due ON cron_schedules (next_run_at) WHERE status = 'active';
//! ```

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use relayq::model::{
    CronSchedule, CronScheduleEdit, CronScheduleSpec, CronStatus, EnqueueOptions, ErrorEntry,
    EventType, FailureReason, Job, JobEdit, JobEvent, JobFilter, JobId, JobStatus, RetryPolicy,
    TagQueryMode, Waitpoint, WaitpointId, WaitpointStatus,
};
use relayq::{Backend, JobTypeFilter};

/// The embedded schema from this crate's doc comment, suitable for
/// bootstrapping a fresh database in tests and small deployments.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

/// PostgreSQL-backed [`Backend`]. Coordination between processors is
/// entirely the database's row locking — this type carries no in-process
/// state beyond the pool.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies [`SCHEMA_SQL`] against the pool. Idempotent — every
    /// statement is guarded with `IF NOT EXISTS`. Intended for tests and
    /// first-run bootstrapping; production deployments should run the
    /// schema through whatever migration tool the rest of the service
    /// uses.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        tracing::debug!("applying relayq-postgres schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::Waiting => "waiting",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn job_status_from_str(s: &str) -> anyhow::Result<JobStatus> {
    Ok(match s {
        "pending" => JobStatus::Pending,
        "processing" => JobStatus::Processing,
        "waiting" => JobStatus::Waiting,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        "cancelled" => JobStatus::Cancelled,
        other => bail!("unknown job status `{other}`"),
    })
}

fn failure_reason_to_str(reason: FailureReason) -> &'static str {
    match reason {
        FailureReason::Timeout => "timeout",
        FailureReason::HandlerError => "handler_error",
        FailureReason::NoHandler => "no_handler",
    }
}

fn failure_reason_from_str(s: &str) -> anyhow::Result<FailureReason> {
    Ok(match s {
        "timeout" => FailureReason::Timeout,
        "handler_error" => FailureReason::HandlerError,
        "no_handler" => FailureReason::NoHandler,
        other => bail!("unknown failure reason `{other}`"),
    })
}

fn waitpoint_status_from_str(s: &str) -> anyhow::Result<WaitpointStatus> {
    Ok(match s {
        "waiting" => WaitpointStatus::Waiting,
        "completed" => WaitpointStatus::Completed,
        "timed_out" => WaitpointStatus::TimedOut,
        other => bail!("unknown waitpoint status `{other}`"),
    })
}

fn cron_status_to_str(status: CronStatus) -> &'static str {
    match status {
        CronStatus::Active => "active",
        CronStatus::Paused => "paused",
    }
}

fn cron_status_from_str(s: &str) -> anyhow::Result<CronStatus> {
    Ok(match s {
        "active" => CronStatus::Active,
        "paused" => CronStatus::Paused,
        other => bail!("unknown cron schedule status `{other}`"),
    })
}

fn event_type_to_str(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Added => "added",
        EventType::Processing => "processing",
        EventType::Completed => "completed",
        EventType::Failed => "failed",
        EventType::Retried => "retried",
        EventType::Cancelled => "cancelled",
        EventType::Waiting => "waiting",
        EventType::Prolonged => "prolonged",
        EventType::Edited => "edited",
    }
}

fn event_type_from_str(s: &str) -> anyhow::Result<EventType> {
    Ok(match s {
        "added" => EventType::Added,
        "processing" => EventType::Processing,
        "completed" => EventType::Completed,
        "failed" => EventType::Failed,
        "retried" => EventType::Retried,
        "cancelled" => EventType::Cancelled,
        "waiting" => EventType::Waiting,
        "prolonged" => EventType::Prolonged,
        "edited" => EventType::Edited,
        other => bail!("unknown event type `{other}`"),
    })
}

fn row_to_job(row: &PgRow) -> anyhow::Result<Job> {
    let status: String = row.try_get("status")?;
    let failure_reason: Option<String> = row.try_get("failure_reason")?;
    let error_history: Json<Vec<ErrorEntry>> = row.try_get("error_history")?;
    let retry_policy: Json<RetryPolicy> = row.try_get("retry_policy")?;

    Ok(Job {
        id: row.try_get("id")?,
        job_type: row.try_get("job_type")?,
        idempotency_key: row.try_get("idempotency_key")?,
        tags: row.try_get("tags")?,
        payload: row.try_get("payload")?,
        priority: row.try_get("priority")?,
        run_at: row.try_get("run_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        timeout_ms: row.try_get("timeout_ms")?,
        force_kill_on_timeout: row.try_get("force_kill_on_timeout")?,
        max_attempts: row.try_get("max_attempts")?,
        attempts: row.try_get("attempts")?,
        retry_policy: retry_policy.0,
        status: job_status_from_str(&status)?,
        locked_at: row.try_get("locked_at")?,
        locked_by: row.try_get("locked_by")?,
        progress: row.try_get("progress")?,
        step_data: row.try_get("step_data")?,
        wait_until: row.try_get("wait_until")?,
        wait_token_id: row.try_get("wait_token_id")?,
        error_history: error_history.0,
        failure_reason: failure_reason.map(|s| failure_reason_from_str(&s)).transpose()?,
        pending_reason: row.try_get("pending_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        last_failed_at: row.try_get("last_failed_at")?,
        last_retried_at: row.try_get("last_retried_at")?,
        last_cancelled_at: row.try_get("last_cancelled_at")?,
    })
}

fn row_to_event(row: &PgRow) -> anyhow::Result<JobEvent> {
    let event_type: String = row.try_get("event_type")?;
    Ok(JobEvent {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        event_type: event_type_from_str(&event_type)?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_waitpoint(row: &PgRow) -> anyhow::Result<Waitpoint> {
    let status: String = row.try_get("status")?;
    Ok(Waitpoint {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        status: waitpoint_status_from_str(&status)?,
        timeout_at: row.try_get("timeout_at")?,
        completed_at: row.try_get("completed_at")?,
        output: row.try_get("output")?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_cron_schedule(row: &PgRow) -> anyhow::Result<CronSchedule> {
    let status: String = row.try_get("status")?;
    let retry_policy: Json<RetryPolicy> = row.try_get("retry_policy")?;
    Ok(CronSchedule {
        id: row.try_get("id")?,
        schedule_name: row.try_get("schedule_name")?,
        cron_expression: row.try_get("cron_expression")?,
        timezone: row.try_get("timezone")?,
        job_type: row.try_get("job_type")?,
        payload: row.try_get("payload")?,
        max_attempts: row.try_get("max_attempts")?,
        priority: row.try_get("priority")?,
        timeout_ms: row.try_get("timeout_ms")?,
        force_kill_on_timeout: row.try_get("force_kill_on_timeout")?,
        tags: row.try_get("tags")?,
        retry_policy: retry_policy.0,
        allow_overlap: row.try_get("allow_overlap")?,
        status: cron_status_from_str(&status)?,
        last_enqueued_at: row.try_get("last_enqueued_at")?,
        last_job_id: row.try_get("last_job_id")?,
        next_run_at: row.try_get("next_run_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Appends ` AND <condition>` for every filter field that's set. Assumes
/// the caller has already written a base predicate (`WHERE TRUE`, or a
/// fixed `WHERE status IN (...)`) ahead of this call.
fn apply_job_filter<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a JobFilter) {
    if let Some(jt) = &filter.job_type {
        builder.push(" AND job_type = ").push_bind(jt);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(job_status_to_str(status));
    }
    if let Some(priority) = filter.priority {
        builder.push(" AND priority = ").push_bind(priority);
    }
    if let Some(run_at) = &filter.run_at {
        if let Some(v) = run_at.gt {
            builder.push(" AND run_at > ").push_bind(v);
        }
        if let Some(v) = run_at.gte {
            builder.push(" AND run_at >= ").push_bind(v);
        }
        if let Some(v) = run_at.lt {
            builder.push(" AND run_at < ").push_bind(v);
        }
        if let Some(v) = run_at.lte {
            builder.push(" AND run_at <= ").push_bind(v);
        }
        if let Some(v) = run_at.eq {
            builder.push(" AND run_at = ").push_bind(v);
        }
    }
    if let Some((values, mode)) = &filter.tags {
        push_tag_condition(builder, values, *mode);
    }
}

fn push_tag_condition<'a>(builder: &mut QueryBuilder<'a, Postgres>, values: &'a [String], mode: TagQueryMode) {
    match mode {
        // Array `=` is order-sensitive; `@>`/`<@` together give the
        // order-insensitive set equality `matches_tag_query` uses.
        TagQueryMode::Exact => {
            builder.push(" AND tags @> ").push_bind(values);
            builder.push(" AND tags <@ ").push_bind(values);
        }
        TagQueryMode::All => {
            builder.push(" AND tags @> ").push_bind(values);
        }
        TagQueryMode::Any => {
            builder.push(" AND tags && ").push_bind(values);
        }
        TagQueryMode::None => {
            builder.push(" AND NOT (tags && ").push_bind(values);
            builder.push(")");
        }
    }
}

/// Appends `, <column> = <value>` for every set field, plus an
/// unconditional `updated_at = NOW()`. The caller supplies the leading
/// `UPDATE <table> SET updated_at = NOW()`.
fn push_job_edit<'a>(builder: &mut QueryBuilder<'a, Postgres>, updates: &'a JobEdit) {
    if let Some(v) = &updates.payload {
        builder.push(", payload = ").push_bind(v);
    }
    if let Some(v) = updates.max_attempts {
        builder.push(", max_attempts = ").push_bind(v);
    }
    if let Some(v) = updates.priority {
        builder.push(", priority = ").push_bind(v);
    }
    if let Some(v) = &updates.run_at {
        match v {
            Some(dt) => {
                builder.push(", run_at = ").push_bind(*dt);
            }
            None => {
                builder.push(", run_at = NOW()");
            }
        }
    }
    if let Some(v) = &updates.timeout_ms {
        match v {
            Some(ms) => {
                builder.push(", timeout_ms = ").push_bind(*ms);
            }
            None => {
                builder.push(", timeout_ms = NULL");
            }
        }
    }
    if let Some(v) = &updates.tags {
        builder.push(", tags = ").push_bind(v);
    }
    if let Some(v) = &updates.retry_policy {
        builder.push(", retry_policy = ").push_bind(Json(v));
    }
}

/// Shared by `complete_waitpoint` and `expire_timed_out_waitpoints`:
/// completing or timing out a bound waitpoint eagerly requeues its job
/// `waiting -> pending` with `run_at = now`, in the same transaction as
/// the waitpoint update.
async fn requeue_waiting_job(conn: &mut sqlx::PgConnection, job_id: JobId) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE jobs SET status = 'pending', run_at = NOW(), wait_until = NULL, \
         wait_token_id = NULL, updated_at = NOW() WHERE id = $1 AND status = 'waiting'",
    )
    .bind(job_id)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Backend for PgBackend {
    async fn enqueue(&self, opts: EnqueueOptions) -> anyhow::Result<JobId> {
        if let Some(key) = &opts.idempotency_key {
            let existing: Option<JobId> = sqlx::query_scalar(
                "SELECT id FROM jobs WHERE idempotency_key = $1 \
                 AND status NOT IN ('completed', 'cancelled') \
                 AND NOT (status = 'failed' AND attempts >= max_attempts) LIMIT 1",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        let row = sqlx::query(
            r#"
            INSERT INTO jobs (
                job_type, idempotency_key, tags, payload, priority, run_at,
                timeout_ms, force_kill_on_timeout, max_attempts, retry_policy, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending')
            ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL
                AND status NOT IN ('completed', 'cancelled')
                AND NOT (status = 'failed' AND attempts >= max_attempts)
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&opts.job_type)
        .bind(&opts.idempotency_key)
        .bind(&opts.tags)
        .bind(&opts.payload)
        .bind(opts.priority)
        .bind(opts.run_at)
        .bind(opts.timeout_ms)
        .bind(opts.force_kill_on_timeout)
        .bind(opts.max_attempts)
        .bind(Json(&opts.retry_policy))
        .fetch_optional(&self.pool)
        .await?;

        let id = match row {
            Some(r) => {
                let id: JobId = r.try_get("id")?;
                let _ = self.record_event(id, EventType::Added, Value::Null).await;
                id
            }
            None => {
                sqlx::query_scalar(
                    "SELECT id FROM jobs WHERE idempotency_key = $1 \
                     AND status NOT IN ('completed', 'cancelled') \
                     AND NOT (status = 'failed' AND attempts >= max_attempts) LIMIT 1",
                )
                .bind(&opts.idempotency_key)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(id)
    }

    async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        job_type: &JobTypeFilter,
    ) -> anyhow::Result<Vec<Job>> {
        let job_types: Option<Vec<String>> = match job_type {
            JobTypeFilter::Any => None,
            JobTypeFilter::One(t) => Some(vec![t.clone()]),
            JobTypeFilter::Set(set) => Some(set.clone()),
        };

        let rows = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE ($3::text[] IS NULL OR job_type = ANY($3))
                  AND (
                        (status = 'pending' AND run_at <= NOW() AND attempts < max_attempts)
                     OR (status = 'failed' AND next_attempt_at IS NOT NULL AND next_attempt_at <= NOW() AND attempts < max_attempts)
                     OR (status = 'waiting' AND wait_until IS NOT NULL AND wait_until <= NOW() AND wait_token_id IS NULL)
                  )
                ORDER BY priority DESC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                locked_by = $2,
                locked_at = NOW(),
                pending_reason = NULL,
                wait_until = NULL,
                updated_at = NOW(),
                attempts = CASE WHEN jobs.status = 'waiting' THEN jobs.attempts ELSE jobs.attempts + 1 END,
                started_at = COALESCE(jobs.started_at, NOW()),
                last_retried_at = CASE
                    WHEN jobs.attempts > 0 AND jobs.status <> 'waiting' THEN NOW()
                    ELSE jobs.last_retried_at
                END
            FROM claimable
            WHERE jobs.id = claimable.id
            RETURNING jobs.*
            "#,
        )
        .bind(batch_size)
        .bind(worker_id)
        .bind(job_types)
        .fetch_all(&self.pool)
        .await?;

        let claimed = rows.iter().map(row_to_job).collect::<anyhow::Result<Vec<_>>>()?;
        for job in &claimed {
            let _ = self.record_event(job.id, EventType::Processing, Value::Null).await;
        }
        Ok(claimed)
    }

    async fn complete(&self, id: JobId) -> anyhow::Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = $1, updated_at = $1, \
             step_data = '{}'::jsonb, wait_until = NULL, wait_token_id = NULL \
             WHERE id = $2 AND status = 'processing'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("complete is only valid from processing, or job {id} does not exist");
        }
        let _ = self.record_event(id, EventType::Completed, Value::Null).await;
        Ok(())
    }

    async fn fail(&self, id: JobId, message: &str, reason: FailureReason) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT status, attempts, max_attempts, retry_policy FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow!("job {id} not found"))?;

        let status: String = row.try_get("status")?;
        let status = job_status_from_str(&status)?;
        if !matches!(status, JobStatus::Processing | JobStatus::Pending) {
            bail!("fail is only valid from processing or pending, got {status:?}");
        }
        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;
        let retry_policy: Json<RetryPolicy> = row.try_get("retry_policy")?;

        let now = Utc::now();
        let next_attempt_at = if attempts < max_attempts {
            Some(now + Duration::milliseconds(retry_policy.0.backoff_delay_ms((attempts - 1).max(0))))
        } else {
            None
        };
        let entry = serde_json::to_value([ErrorEntry { message: message.to_string(), timestamp: now }])?;

        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_failed_at = $1, failure_reason = $2, \
             updated_at = $1, next_attempt_at = $3, error_history = error_history || $4::jsonb \
             WHERE id = $5",
        )
        .bind(now)
        .bind(failure_reason_to_str(reason))
        .bind(next_attempt_at)
        .bind(entry)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        let _ = self.record_event(id, EventType::Failed, Value::Null).await;
        Ok(())
    }

    async fn wait(
        &self,
        id: JobId,
        wait_until: Option<DateTime<Utc>>,
        wait_token_id: Option<WaitpointId>,
        step_data: Value,
    ) -> anyhow::Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'waiting', wait_until = $1, wait_token_id = $2, \
             step_data = $3, updated_at = $4 WHERE id = $5 AND status = 'processing'",
        )
        .bind(wait_until)
        .bind(wait_token_id)
        .bind(&step_data)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("wait is only valid from processing, or job {id} does not exist");
        }
        let _ = self.record_event(id, EventType::Waiting, Value::Null).await;
        Ok(())
    }

    async fn prolong(&self, id: JobId) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET locked_at = NOW() WHERE id = $1 AND status = 'processing'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn retry(&self, id: JobId) -> anyhow::Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', locked_at = NULL, locked_by = NULL, \
             next_attempt_at = $1, last_retried_at = $1, updated_at = $1 \
             WHERE id = $2 AND status IN ('failed', 'processing')",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            let _ = self.record_event(id, EventType::Retried, Value::Null).await;
        }
        Ok(())
    }

    async fn cancel(&self, id: JobId) -> anyhow::Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'cancelled', wait_until = NULL, wait_token_id = NULL, \
             last_cancelled_at = $1, updated_at = $1 WHERE id = $2 AND status IN ('pending', 'waiting')",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            let _ = self.record_event(id, EventType::Cancelled, Value::Null).await;
        }
        Ok(())
    }

    async fn edit(&self, id: JobId, updates: JobEdit) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| anyhow!("job {id} not found"))?;
        let status: String = row.try_get("status")?;
        let status = job_status_from_str(&status)?;
        if status != JobStatus::Pending {
            bail!("edit is only valid on pending jobs, got {status:?}");
        }

        let mut builder = QueryBuilder::new("UPDATE jobs SET updated_at = NOW()");
        push_job_edit(&mut builder, &updates);
        builder.push(" WHERE id = ").push_bind(id);
        builder.build().execute(&mut *tx).await?;

        tx.commit().await?;
        let _ = self.record_event(id, EventType::Edited, Value::Null).await;
        Ok(())
    }

    async fn bulk_cancel(&self, filter: &JobFilter) -> anyhow::Result<u64> {
        let now = Utc::now();
        let mut builder = QueryBuilder::new(
            "UPDATE jobs SET status = 'cancelled', wait_until = NULL, wait_token_id = NULL, last_cancelled_at = ",
        );
        builder.push_bind(now).push(", updated_at = ").push_bind(now);
        builder.push(" WHERE status IN ('pending', 'waiting')");
        apply_job_filter(&mut builder, filter);
        builder.push(" RETURNING id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let ids: Vec<JobId> = rows.iter().map(|r| r.try_get("id")).collect::<Result<_, _>>()?;
        for id in &ids {
            let _ = self.record_event(*id, EventType::Cancelled, Value::Null).await;
        }
        Ok(ids.len() as u64)
    }

    async fn bulk_edit(&self, filter: &JobFilter, updates: JobEdit) -> anyhow::Result<u64> {
        let mut builder = QueryBuilder::new("UPDATE jobs SET updated_at = NOW()");
        push_job_edit(&mut builder, &updates);
        builder.push(" WHERE status = 'pending'");
        apply_job_filter(&mut builder, filter);
        builder.push(" RETURNING id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let ids: Vec<JobId> = rows.iter().map(|r| r.try_get("id")).collect::<Result<_, _>>()?;
        for id in &ids {
            let _ = self.record_event(*id, EventType::Edited, Value::Null).await;
        }
        Ok(ids.len() as u64)
    }

    async fn reclaim_stuck_jobs(&self, max_processing_minutes: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', locked_at = NULL, locked_by = NULL, updated_at = NOW() \
             WHERE status = 'processing' AND locked_at < NOW() - ($1::bigint * INTERVAL '1 minute')",
        )
        .bind(max_processing_minutes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_progress(&self, id: JobId, progress: i32) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET progress = $1, updated_at = NOW() WHERE id = $2")
            .bind(progress)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_step_data(&self, id: JobId, step_data: Value) -> anyhow::Result<()> {
        sqlx::query("UPDATE jobs SET step_data = $1, updated_at = NOW() WHERE id = $2")
            .bind(&step_data)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_no_handler(&self, job_type: &str, reason: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("UPDATE jobs SET pending_reason = $1 WHERE job_type = $2 AND status = 'pending'")
            .bind(reason)
            .bind(job_type)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_old_jobs(&self, older_than_days: i64, batch_size: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE id IN ( \
                SELECT id FROM jobs \
                WHERE status = 'completed' AND completed_at < NOW() - ($1::bigint * INTERVAL '1 day') \
                LIMIT $2 \
             )",
        )
        .bind(older_than_days)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_old_job_events(&self, older_than_days: i64, batch_size: i64) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_events WHERE id IN ( \
                SELECT id FROM job_events \
                WHERE created_at < NOW() - ($1::bigint * INTERVAL '1 day') \
                LIMIT $2 \
             )",
        )
        .bind(older_than_days)
        .bind(batch_size)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn record_event(&self, job_id: JobId, event_type: EventType, metadata: Value) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO job_events (job_id, event_type, metadata) VALUES ($1, $2, $3)")
            .bind(job_id)
            .bind(event_type_to_str(event_type))
            .bind(&metadata)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_job_events(&self, job_id: JobId, limit: i64, offset: i64) -> anyhow::Result<Vec<JobEvent>> {
        let rows = sqlx::query("SELECT * FROM job_events WHERE job_id = $1 ORDER BY created_at LIMIT $2 OFFSET $3")
            .bind(job_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn get_job(&self, id: JobId) -> anyhow::Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn get_jobs(&self, filter: &JobFilter, limit: i64, offset: i64) -> anyhow::Result<Vec<Job>> {
        let mut builder = QueryBuilder::new("SELECT * FROM jobs WHERE TRUE");
        apply_job_filter(&mut builder, filter);
        builder.push(" ORDER BY id LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn get_jobs_by_status(&self, status: JobStatus, limit: i64, offset: i64) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = $1 ORDER BY id LIMIT $2 OFFSET $3")
            .bind(job_status_to_str(status))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn get_jobs_by_tags(
        &self,
        values: &[String],
        mode: TagQueryMode,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Job>> {
        let mut builder = QueryBuilder::new("SELECT * FROM jobs WHERE TRUE");
        push_tag_condition(&mut builder, values, mode);
        builder.push(" ORDER BY id LIMIT ").push_bind(limit).push(" OFFSET ").push_bind(offset);
        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn get_all_jobs(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY id LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn create_waitpoint(
        &self,
        job_id: Option<JobId>,
        timeout_at: Option<DateTime<Utc>>,
        tags: Vec<String>,
    ) -> anyhow::Result<Waitpoint> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO waitpoints (id, job_id, status, timeout_at, tags) \
             VALUES ($1, $2, 'waiting', $3, $4) RETURNING *",
        )
        .bind(id)
        .bind(job_id)
        .bind(timeout_at)
        .bind(&tags)
        .fetch_one(&self.pool)
        .await?;
        row_to_waitpoint(&row)
    }

    async fn bind_waitpoint(&self, id: WaitpointId, job_id: JobId) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE waitpoints SET job_id = $1 WHERE id = $2")
            .bind(job_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("waitpoint {id} not found");
        }
        Ok(())
    }

    async fn complete_waitpoint(&self, id: WaitpointId, output: Option<Value>) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE waitpoints SET status = 'completed', output = $1, completed_at = NOW() \
             WHERE id = $2 RETURNING job_id",
        )
        .bind(&output)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| anyhow!("waitpoint {id} not found"))?;

        let job_id: Option<JobId> = row.try_get("job_id")?;
        if let Some(job_id) = job_id {
            requeue_waiting_job(&mut tx, job_id).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_waitpoint(&self, id: WaitpointId) -> anyhow::Result<Option<Waitpoint>> {
        let row = sqlx::query("SELECT * FROM waitpoints WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_waitpoint).transpose()
    }

    async fn expire_timed_out_waitpoints(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "UPDATE waitpoints SET status = 'timed_out', completed_at = NOW() \
             WHERE status = 'waiting' AND timeout_at IS NOT NULL AND timeout_at <= NOW() \
             RETURNING job_id",
        )
        .fetch_all(&mut *tx)
        .await?;
        let count = rows.len() as u64;
        for row in &rows {
            let job_id: Option<JobId> = row.try_get("job_id")?;
            if let Some(job_id) = job_id {
                requeue_waiting_job(&mut tx, job_id).await?;
            }
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn add_cron_schedule(&self, spec: CronScheduleSpec) -> anyhow::Result<CronSchedule> {
        let row = sqlx::query(
            r#"
            INSERT INTO cron_schedules (
                schedule_name, cron_expression, timezone, job_type, payload,
                max_attempts, priority, timeout_ms, force_kill_on_timeout, tags,
                retry_policy, allow_overlap, status, next_run_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'active', $13)
            ON CONFLICT (schedule_name) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&spec.schedule_name)
        .bind(&spec.cron_expression)
        .bind(&spec.timezone)
        .bind(&spec.job_type)
        .bind(&spec.payload)
        .bind(spec.max_attempts)
        .bind(spec.priority)
        .bind(spec.timeout_ms)
        .bind(spec.force_kill_on_timeout)
        .bind(&spec.tags)
        .bind(Json(&spec.retry_policy))
        .bind(spec.allow_overlap)
        .bind(spec.next_run_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => row_to_cron_schedule(&r),
            None => bail!("cron schedule name `{}` already exists", spec.schedule_name),
        }
    }

    async fn get_cron_schedule(&self, id: i64) -> anyhow::Result<Option<CronSchedule>> {
        let row = sqlx::query("SELECT * FROM cron_schedules WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_cron_schedule).transpose()
    }

    async fn get_cron_schedule_by_name(&self, name: &str) -> anyhow::Result<Option<CronSchedule>> {
        let row = sqlx::query("SELECT * FROM cron_schedules WHERE schedule_name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_cron_schedule).transpose()
    }

    async fn list_cron_schedules(&self, status: Option<CronStatus>) -> anyhow::Result<Vec<CronSchedule>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM cron_schedules WHERE status = $1 ORDER BY id")
                    .bind(cron_status_to_str(s))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query("SELECT * FROM cron_schedules ORDER BY id").fetch_all(&self.pool).await?,
        };
        rows.iter().map(row_to_cron_schedule).collect()
    }

    async fn pause_cron_schedule(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE cron_schedules SET status = 'paused', updated_at = NOW() WHERE id = $1 AND status = 'active'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resume_cron_schedule(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE cron_schedules SET status = 'active', updated_at = NOW() WHERE id = $1 AND status = 'paused'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_cron_schedule(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM cron_schedules WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn edit_cron_schedule(&self, id: i64, updates: CronScheduleEdit) -> anyhow::Result<CronSchedule> {
        let mut builder = QueryBuilder::new("UPDATE cron_schedules SET updated_at = NOW()");
        if let Some(v) = &updates.cron_expression {
            builder.push(", cron_expression = ").push_bind(v);
        }
        if let Some(v) = &updates.timezone {
            builder.push(", timezone = ").push_bind(v);
        }
        if let Some(v) = &updates.job_type {
            builder.push(", job_type = ").push_bind(v);
        }
        if let Some(v) = &updates.payload {
            builder.push(", payload = ").push_bind(v);
        }
        if let Some(v) = updates.max_attempts {
            builder.push(", max_attempts = ").push_bind(v);
        }
        if let Some(v) = updates.priority {
            builder.push(", priority = ").push_bind(v);
        }
        if let Some(v) = &updates.timeout_ms {
            match v {
                Some(ms) => {
                    builder.push(", timeout_ms = ").push_bind(*ms);
                }
                None => {
                    builder.push(", timeout_ms = NULL");
                }
            }
        }
        if let Some(v) = updates.force_kill_on_timeout {
            builder.push(", force_kill_on_timeout = ").push_bind(v);
        }
        if let Some(v) = &updates.tags {
            builder.push(", tags = ").push_bind(v);
        }
        if let Some(v) = &updates.retry_policy {
            builder.push(", retry_policy = ").push_bind(Json(v));
        }
        if let Some(v) = updates.allow_overlap {
            builder.push(", allow_overlap = ").push_bind(v);
        }
        if let Some(v) = updates.next_run_at {
            builder.push(", next_run_at = ").push_bind(v);
        }
        builder.push(" WHERE id = ").push_bind(id);
        builder.push(" RETURNING *");

        let row = builder.build().fetch_optional(&self.pool).await?.ok_or_else(|| anyhow!("cron schedule {id} not found"))?;
        row_to_cron_schedule(&row)
    }

    async fn get_due_cron_schedules(&self) -> anyhow::Result<Vec<CronSchedule>> {
        let rows = sqlx::query("SELECT * FROM cron_schedules WHERE status = 'active' AND next_run_at <= NOW() ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_cron_schedule).collect()
    }

    async fn update_cron_schedule_after_enqueue(
        &self,
        id: i64,
        observed_next_run_at: DateTime<Utc>,
        last_enqueued_at: DateTime<Utc>,
        last_job_id: Option<JobId>,
        next_run_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE cron_schedules SET last_enqueued_at = $1, last_job_id = COALESCE($2, last_job_id), \
             next_run_at = $3, updated_at = NOW() WHERE id = $4 AND next_run_at = $5",
        )
        .bind(last_enqueued_at)
        .bind(last_job_id)
        .bind(next_run_at)
        .bind(id)
        .bind(observed_next_run_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq::model::RunAtFilter;

    /// Every test here needs a live database; they're skipped (not failed)
    /// when `RELAYQ_TEST_DATABASE_URL` isn't set, the same opt-in pattern
    /// `seesaw-job-postgres`'s own integration suite would need since
    /// `sqlx::query` isn't checked against a schema at compile time.
    async fn test_backend() -> Option<PgBackend> {
        let url = std::env::var("RELAYQ_TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        let backend = PgBackend::new(pool);
        backend.migrate().await.expect("apply schema");
        Some(backend)
    }

    #[tokio::test]
    async fn enqueue_and_claim_round_trip() {
        let Some(backend) = test_backend().await else {
            eprintln!("skipping: RELAYQ_TEST_DATABASE_URL not set");
            return;
        };
        let id = backend.enqueue(EnqueueOptions::new("send_email", Value::Null)).await.unwrap();
        let batch = backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(batch[0].status, JobStatus::Processing);
        assert_eq!(batch[0].attempts, 1);
    }

    #[tokio::test]
    async fn idempotency_key_collision_returns_the_live_row() {
        let Some(backend) = test_backend().await else {
            eprintln!("skipping: RELAYQ_TEST_DATABASE_URL not set");
            return;
        };
        let mut opts = EnqueueOptions::new("send_email", Value::Null);
        opts.idempotency_key = Some("dup".to_string());
        let first = backend.enqueue(opts.clone()).await.unwrap();
        let second = backend.enqueue(opts).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn idempotency_key_does_not_collide_with_a_completed_row() {
        let Some(backend) = test_backend().await else {
            eprintln!("skipping: RELAYQ_TEST_DATABASE_URL not set");
            return;
        };
        let mut opts = EnqueueOptions::new("send_email", Value::Null);
        opts.idempotency_key = Some("dup-completed".to_string());
        let first = backend.enqueue(opts).await.unwrap();
        backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        backend.complete(first).await.unwrap();

        let mut opts = EnqueueOptions::new("send_email", Value::Null);
        opts.idempotency_key = Some("dup-completed".to_string());
        let second = backend.enqueue(opts).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn idempotency_key_does_not_collide_with_an_exhausted_failed_row() {
        let Some(backend) = test_backend().await else {
            eprintln!("skipping: RELAYQ_TEST_DATABASE_URL not set");
            return;
        };
        let mut opts = EnqueueOptions::new("send_email", Value::Null);
        opts.idempotency_key = Some("dup-failed".to_string());
        opts.max_attempts = 1;
        let first = backend.enqueue(opts).await.unwrap();
        backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        backend.fail(first, "boom", FailureReason::HandlerError).await.unwrap();

        let mut opts = EnqueueOptions::new("send_email", Value::Null);
        opts.idempotency_key = Some("dup-failed".to_string());
        let second = backend.enqueue(opts).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn waitpoint_completion_requeues_the_bound_job() {
        let Some(backend) = test_backend().await else {
            eprintln!("skipping: RELAYQ_TEST_DATABASE_URL not set");
            return;
        };
        let id = backend.enqueue(EnqueueOptions::new("approve", Value::Null)).await.unwrap();
        backend.claim_batch("w1", 10, &JobTypeFilter::Any).await.unwrap();
        let wp = backend.create_waitpoint(Some(id), None, vec![]).await.unwrap();
        backend.wait(id, None, Some(wp.id), Value::Null).await.unwrap();

        backend.complete_waitpoint(wp.id, Some(serde_json::json!({"ok": true}))).await.unwrap();

        let job = backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn get_jobs_filters_by_run_at() {
        let Some(backend) = test_backend().await else {
            eprintln!("skipping: RELAYQ_TEST_DATABASE_URL not set");
            return;
        };
        let now = Utc::now();
        backend.enqueue(EnqueueOptions::new("t", Value::Null)).await.unwrap();

        let filter = JobFilter { run_at: Some(RunAtFilter::eq(now)), ..Default::default() };
        let jobs = backend.get_jobs(&filter, 10, 0).await.unwrap();
        assert!(jobs.is_empty());
    }
}
