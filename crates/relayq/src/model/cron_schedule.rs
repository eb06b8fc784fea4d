use chrono::{DateTime, Utc};
use serde_json::Value;

use super::retry::RetryPolicy;
use super::JobId;

/// `CronSchedule.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronStatus {
    Active,
    Paused,
}

/// A recurring job template.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    pub id: i64,
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
    pub status: CronStatus,

    pub last_enqueued_at: Option<DateTime<Utc>>,
    pub last_job_id: Option<JobId>,
    pub next_run_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs to `Backend::add_cron_schedule`. `next_run_at` is computed by
/// the caller (the façade) via `relayq-cron::get_next_occurrence` before
/// the row is created, since the evaluator lives outside the `Backend`
/// abstraction.
#[derive(Debug, Clone)]
pub struct CronScheduleSpec {
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
    pub next_run_at: DateTime<Utc>,
}

/// Partial update applied by `Backend::edit_cron_schedule`. `next_run_at`
/// is recomputed by the façade whenever `cron_expression` or `timezone`
/// changes.
#[derive(Debug, Clone, Default)]
pub struct CronScheduleEdit {
    pub cron_expression: Option<String>,
    pub timezone: Option<String>,
    pub job_type: Option<String>,
    pub payload: Option<Value>,
    pub max_attempts: Option<i32>,
    pub priority: Option<i32>,
    pub timeout_ms: Option<Option<i64>>,
    pub force_kill_on_timeout: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub retry_policy: Option<RetryPolicy>,
    pub allow_overlap: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
}
