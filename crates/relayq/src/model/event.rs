use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

/// Append-only audit entry. Recording failure never interrupts the main
/// state transition it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Added,
    Processing,
    Completed,
    Failed,
    Retried,
    Cancelled,
    Waiting,
    Prolonged,
    Edited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: i64,
    pub job_id: JobId,
    pub event_type: EventType,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
