use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::JobId;

pub type WaitpointId = Uuid;

/// External signal carrier. A waitpoint with `job_id: None` is a
/// free-standing token that some job may later bind to via
/// `waitForToken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitpointStatus {
    Waiting,
    Completed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waitpoint {
    pub id: WaitpointId,
    pub job_id: Option<JobId>,
    pub status: WaitpointStatus,
    pub timeout_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}
