use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::retry::RetryPolicy;
use super::WaitpointId;

/// Monotonically increasing job identifier.
pub type JobId = i64;

/// The lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// `completed`, `cancelled`, and `failed-with-no-attempts-left` are the
    /// only terminal states a caller should treat as "won't change without
    /// user action". Callers that need the attempts check should combine
    /// this with [`Job::is_exhausted`].
    pub fn is_terminal_status(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed)
    }
}

/// Why a job landed in `failed`, persisted so operators and resuming
/// handlers can distinguish the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    HandlerError,
    NoHandler,
}

/// One entry in `errorHistory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A durable unit of work.
///
/// `processing` implies a live lease, `waiting` implies a wait condition,
/// terminal states clear lease/wait/step fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: String,
    pub idempotency_key: Option<String>,
    pub tags: Vec<String>,
    pub payload: Value,

    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,

    pub timeout_ms: Option<i64>,
    pub force_kill_on_timeout: bool,
    pub max_attempts: i32,
    pub attempts: i32,
    pub retry_policy: RetryPolicy,

    pub status: JobStatus,

    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    pub progress: Option<i32>,

    /// Map from step name to `{__completed, result}`, plus `__wait_N`
    /// entries. Cleared on `completed`.
    pub step_data: Value,

    pub wait_until: Option<DateTime<Utc>>,
    pub wait_token_id: Option<WaitpointId>,

    pub error_history: Vec<ErrorEntry>,
    pub failure_reason: Option<FailureReason>,
    pub pending_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_retried_at: Option<DateTime<Utc>>,
    pub last_cancelled_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `attempts == max_attempts` and currently `failed`: no further retry
    /// will ever be scheduled for this row.
    pub fn is_exhausted(&self) -> bool {
        self.status == JobStatus::Failed && self.attempts >= self.max_attempts
    }

    /// A job is terminal only when completed, cancelled, or failed with
    /// `attempts == max_attempts`.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed | JobStatus::Cancelled => true,
            JobStatus::Failed => self.attempts >= self.max_attempts,
            _ => false,
        }
    }
}

/// Inputs to `Backend::enqueue`. Defaults: `max_attempts=3`,
/// `priority=0`, `run_at=now`, `force_kill_on_timeout=false`.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub job_type: String,
    pub payload: Value,
    pub priority: i32,
    pub run_at: DateTime<Utc>,
    pub timeout_ms: Option<i64>,
    pub force_kill_on_timeout: bool,
    pub max_attempts: i32,
    pub tags: Vec<String>,
    pub idempotency_key: Option<String>,
    pub retry_policy: RetryPolicy,
}

impl EnqueueOptions {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: 0,
            run_at: Utc::now(),
            timeout_ms: None,
            force_kill_on_timeout: false,
            max_attempts: 3,
            tags: Vec::new(),
            idempotency_key: None,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Partial update applied by `Backend::edit` / `bulk_edit`. `None` fields
/// are left unchanged; `run_at: Some(None)` means "run immediately".
#[derive(Debug, Clone, Default)]
pub struct JobEdit {
    pub payload: Option<Value>,
    pub max_attempts: Option<i32>,
    pub priority: Option<i32>,
    pub run_at: Option<Option<DateTime<Utc>>>,
    pub timeout_ms: Option<Option<i64>>,
    pub tags: Option<Vec<String>>,
    pub retry_policy: Option<RetryPolicy>,
}
