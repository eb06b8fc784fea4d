use chrono::{DateTime, Utc};

use super::tags::TagQueryMode;
use super::JobStatus;

/// `{gt?, gte?, lt?, lte?, eq?}` comparison against `Job.run_at`.
#[derive(Debug, Clone, Default)]
pub struct RunAtFilter {
    pub gt: Option<DateTime<Utc>>,
    pub gte: Option<DateTime<Utc>>,
    pub lt: Option<DateTime<Utc>>,
    pub lte: Option<DateTime<Utc>>,
    pub eq: Option<DateTime<Utc>>,
}

impl RunAtFilter {
    pub fn eq(at: DateTime<Utc>) -> Self {
        Self { eq: Some(at), ..Default::default() }
    }

    pub fn matches(&self, run_at: DateTime<Utc>) -> bool {
        self.gt.map_or(true, |v| run_at > v)
            && self.gte.map_or(true, |v| run_at >= v)
            && self.lt.map_or(true, |v| run_at < v)
            && self.lte.map_or(true, |v| run_at <= v)
            && self.eq.map_or(true, |v| run_at == v)
    }
}

/// Filter used by `getJobs`, `cancelAllUpcomingJobs`, and `editAllPendingJobs`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
    pub priority: Option<i32>,
    pub run_at: Option<RunAtFilter>,
    pub tags: Option<(Vec<String>, TagQueryMode)>,
}
