//! The Supervisor: background maintenance independent of the
//! [`crate::Processor`]. Each cycle reclaims stuck leases, purges old
//! jobs/events, and expires waitpoint timeouts — four isolated tasks, run
//! in order, where one task's failure never prevents its siblings from
//! running (mirrors `seesaw-job-postgres`'s `reclaim_expired`/
//! `cleanup_succeeded` helpers, which this crate's maintenance loop calls
//! in sequence and logs-and-continues on error).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::error::QueueResult;

/// Invoked with a description of whichever maintenance task failed; never
/// propagated, since every task is isolated.
pub type OnError = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// Supervisor configuration.
#[derive(Clone)]
pub struct SupervisorOptions {
    pub interval_ms: u64,
    pub job_retention_days: i64,
    pub event_retention_days: i64,
    pub stuck_jobs_timeout_minutes: i64,
    pub cleanup_batch_size: i64,

    pub reclaim_stuck_jobs_enabled: bool,
    pub cleanup_jobs_enabled: bool,
    pub cleanup_events_enabled: bool,
    pub expire_waitpoints_enabled: bool,

    pub on_error: Option<OnError>,
}

impl std::fmt::Debug for SupervisorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorOptions")
            .field("interval_ms", &self.interval_ms)
            .field("job_retention_days", &self.job_retention_days)
            .field("event_retention_days", &self.event_retention_days)
            .field("stuck_jobs_timeout_minutes", &self.stuck_jobs_timeout_minutes)
            .field("cleanup_batch_size", &self.cleanup_batch_size)
            .field("reclaim_stuck_jobs_enabled", &self.reclaim_stuck_jobs_enabled)
            .field("cleanup_jobs_enabled", &self.cleanup_jobs_enabled)
            .field("cleanup_events_enabled", &self.cleanup_events_enabled)
            .field("expire_waitpoints_enabled", &self.expire_waitpoints_enabled)
            .finish()
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            job_retention_days: 30,
            event_retention_days: 30,
            stuck_jobs_timeout_minutes: 30,
            cleanup_batch_size: 1_000,
            reclaim_stuck_jobs_enabled: true,
            cleanup_jobs_enabled: true,
            cleanup_events_enabled: true,
            expire_waitpoints_enabled: true,
            on_error: None,
        }
    }
}

/// A single cycle's result, useful for tests and logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorCycleReport {
    pub reclaimed: u64,
    pub jobs_cleaned: u64,
    pub events_cleaned: u64,
    pub waitpoints_expired: u64,
}

/// Periodic maintenance runner, independent of [`crate::Processor`].
pub struct Supervisor {
    backend: Arc<dyn Backend>,
    options: SupervisorOptions,
    running: AtomicBool,
    cycle_in_flight: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(backend: Arc<dyn Backend>, options: SupervisorOptions) -> Self {
        Self {
            backend,
            options,
            running: AtomicBool::new(false),
            cycle_in_flight: watch::channel(false).0,
            loop_handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs exactly one maintenance cycle and returns a report of what each
    /// enabled task did.
    pub async fn start(&self) -> QueueResult<SupervisorCycleReport> {
        Ok(self.run_cycle().await)
    }

    /// Starts the serialized background loop, sleeping `interval_ms`
    /// between cycles.
    pub fn start_in_background(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                let _ = this.cycle_in_flight.send(true);
                this.run_cycle().await;
                let _ = this.cycle_in_flight.send(false);

                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::time::sleep(StdDuration::from_millis(this.options.interval_ms)).await;
            }
        });
        *self.loop_handle.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Clears the schedule and awaits the current cycle, up to
    /// `timeout_ms`.
    pub async fn stop_and_drain(&self, timeout_ms: u64) {
        self.stop();
        let mut rx = self.cycle_in_flight.subscribe();
        if *rx.borrow() {
            let wait = async {
                while *rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            let _ = tokio::time::timeout(StdDuration::from_millis(timeout_ms), wait).await;
        }
    }

    async fn run_cycle(&self) -> SupervisorCycleReport {
        let mut report = SupervisorCycleReport::default();

        if self.options.reclaim_stuck_jobs_enabled {
            match self.backend.reclaim_stuck_jobs(self.options.stuck_jobs_timeout_minutes).await {
                Ok(n) => report.reclaimed = n,
                Err(err) => self.report_error("reclaim_stuck_jobs", &err),
            }
        }

        if self.options.cleanup_jobs_enabled {
            match self
                .backend
                .cleanup_old_jobs(self.options.job_retention_days, self.options.cleanup_batch_size)
                .await
            {
                Ok(n) => report.jobs_cleaned = n,
                Err(err) => self.report_error("cleanup_old_jobs", &err),
            }
        }

        if self.options.cleanup_events_enabled {
            match self
                .backend
                .cleanup_old_job_events(self.options.event_retention_days, self.options.cleanup_batch_size)
                .await
            {
                Ok(n) => report.events_cleaned = n,
                Err(err) => self.report_error("cleanup_old_job_events", &err),
            }
        }

        if self.options.expire_waitpoints_enabled {
            match self.backend.expire_timed_out_waitpoints().await {
                Ok(n) => report.waitpoints_expired = n,
                Err(err) => self.report_error("expire_timed_out_waitpoints", &err),
            }
        }

        report
    }

    fn report_error(&self, task: &str, err: &anyhow::Error) {
        tracing::error!(task, %err, "supervisor task failed");
        if let Some(cb) = &self.options.on_error {
            cb(task, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::model::EnqueueOptions;
    use serde_json::Value;

    #[tokio::test]
    async fn reclaims_stuck_jobs_and_reports_the_count() {
        let backend = Arc::new(MemoryBackend::new());
        let id = backend.enqueue(EnqueueOptions::new("t", Value::Null)).await.unwrap();
        backend.claim_batch("w1", 10, &crate::backend::JobTypeFilter::Any).await.unwrap();

        // Simulate a lease well past the stuck threshold by reclaiming with
        // a zero-minute window — any processing row qualifies.
        let supervisor = Supervisor::new(backend.clone(), SupervisorOptions {
            stuck_jobs_timeout_minutes: 0,
            ..SupervisorOptions::default()
        });
        let report = supervisor.start().await.unwrap();
        assert_eq!(report.reclaimed, 1);

        let job = backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, crate::model::JobStatus::Pending);
    }

    #[tokio::test]
    async fn disabled_tasks_are_skipped() {
        let backend = Arc::new(MemoryBackend::new());
        let supervisor = Supervisor::new(backend, SupervisorOptions {
            reclaim_stuck_jobs_enabled: false,
            cleanup_jobs_enabled: false,
            cleanup_events_enabled: false,
            expire_waitpoints_enabled: false,
            ..SupervisorOptions::default()
        });
        let report = supervisor.start().await.unwrap();
        assert_eq!(report.reclaimed, 0);
        assert_eq!(report.jobs_cleaned, 0);
    }

    #[tokio::test]
    async fn stop_and_drain_waits_for_the_in_flight_cycle() {
        let backend = Arc::new(MemoryBackend::new());
        let supervisor = Arc::new(Supervisor::new(backend, SupervisorOptions::default()));
        supervisor.start_in_background();
        assert!(supervisor.is_running());
        supervisor.stop_and_drain(1_000).await;
        assert!(!supervisor.is_running());
    }
}
