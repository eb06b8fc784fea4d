//! The Processor: a fixed-size parallel worker pulling from a
//! [`Backend`]. Each cycle enqueues due cron jobs, claims a batch, and
//! dispatches it through a bounded concurrency pool — the same
//! `for_each_concurrent` shape `seesaw-core`'s dispatcher uses to drain
//! concurrent effects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::backend::{Backend, JobTypeFilter};
use crate::error::{QueueError, QueueResult};
use crate::handler::context::JobContext;
use crate::handler::{run_cooperative, run_isolated, ExecutionOutcome, HandlerRegistry};
use crate::model::{EventType, FailureReason, Job, JobId};
use crate::orchestrator::{resolve_pending_waits, WaitRequest};

/// Invoked with `(job_id, error_message)` whenever a dispatched job ends in
/// `failed` — errors in one slot never prevent others; this is the
/// channel through which they're still observable.
pub type OnError = Arc<dyn Fn(JobId, String) + Send + Sync>;

/// Processor configuration.
#[derive(Clone)]
pub struct ProcessorOptions {
    pub worker_id: String,
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    pub job_type: JobTypeFilter,
    /// Per-job-type concurrency cap layered under the overall `concurrency`
    /// bound. Must be a positive integer if provided; validated
    /// synchronously by [`Processor::new`], never persisted.
    pub group_concurrency: Option<usize>,
    pub on_error: Option<OnError>,
    pub verbose: bool,
}

impl std::fmt::Debug for ProcessorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorOptions")
            .field("worker_id", &self.worker_id)
            .field("batch_size", &self.batch_size)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("concurrency", &self.concurrency)
            .field("group_concurrency", &self.group_concurrency)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            batch_size: 10,
            poll_interval_ms: 5_000,
            concurrency: 3,
            job_type: JobTypeFilter::Any,
            group_concurrency: None,
            on_error: None,
            verbose: false,
        }
    }
}

impl ProcessorOptions {
    pub(crate) fn validate(&self) -> QueueResult<()> {
        if let Some(n) = self.group_concurrency {
            if n == 0 {
                return Err(QueueError::Config(
                    "group_concurrency must be a positive integer if provided".to_string(),
                ));
            }
        }
        if self.concurrency == 0 {
            return Err(QueueError::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Fixed-size parallel worker pulling from a [`Backend`]. Construct
/// with [`Processor::new`], then drive it with [`Processor::start`] (one
/// cycle) or [`Processor::start_in_background`] (a serialized poll loop).
pub struct Processor {
    backend: Arc<dyn Backend>,
    registry: Arc<HandlerRegistry>,
    options: ProcessorOptions,
    running: AtomicBool,
    cycle_in_flight: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: HandlerRegistry,
        options: ProcessorOptions,
    ) -> QueueResult<Self> {
        options.validate()?;
        Ok(Self {
            backend,
            registry: Arc::new(registry),
            options,
            running: AtomicBool::new(false),
            cycle_in_flight: watch::channel(false).0,
            loop_handle: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs exactly one claim cycle — cron hook, claim, dispatch under the
    /// concurrency pool, await every job in the batch — and returns the
    /// number of jobs processed.
    pub async fn start(&self) -> QueueResult<u64> {
        Ok(self.run_cycle().await)
    }

    /// Starts the serialized background poll loop: claim; if a full batch
    /// came back, schedule the next cycle immediately, otherwise wait
    /// `poll_interval_ms`. Never two claim cycles in flight. A no-op if
    /// already running.
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
                let processed = this.run_cycle().await;
                let _ = this.cycle_in_flight.send(false);

                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                if processed < this.options.batch_size.max(0) as u64 {
                    tokio::time::sleep(StdDuration::from_millis(this.options.poll_interval_ms)).await;
                }
            }
        });
        *self.loop_handle.lock().unwrap() = Some(handle);
    }

    /// Clears the schedule. Does not wait on in-flight work.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Clears the schedule and awaits the current batch, up to
    /// `drain_timeout_ms` (default 30000).
    pub async fn stop_and_drain(&self, drain_timeout_ms: u64) {
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
            let _ = tokio::time::timeout(StdDuration::from_millis(drain_timeout_ms), wait).await;
        }
    }

    async fn run_cycle(&self) -> u64 {
        if let Err(err) = crate::cron_hook::enqueue_due_cron_jobs(self.backend.as_ref()).await {
            tracing::error!(%err, "cron enqueue hook failed");
        }

        let batch = match self
            .backend
            .claim_batch(&self.options.worker_id, self.options.batch_size, &self.options.job_type)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                tracing::error!(%err, "failed to claim batch");
                return 0;
            }
        };

        if self.options.verbose {
            tracing::info!(worker_id = %self.options.worker_id, claimed = batch.len(), "claimed batch");
        }

        let count = batch.len() as u64;
        let concurrency = self.options.concurrency;
        let group_semaphores = self.build_group_semaphores(&batch);

        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let on_error = self.options.on_error.clone();

        stream::iter(batch)
            .for_each_concurrent(concurrency, move |job| {
                let backend = backend.clone();
                let registry = registry.clone();
                let on_error = on_error.clone();
                let group_semaphores = group_semaphores.clone();
                async move {
                    let _group_permit = match group_semaphores.get(&job.job_type) {
                        Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore is never closed")),
                        None => None,
                    };
                    process_one_job(backend, registry, job, on_error).await;
                }
            })
            .await;

        count
    }

    fn build_group_semaphores(&self, batch: &[Job]) -> Arc<HashMap<String, Arc<Semaphore>>> {
        let Some(limit) = self.options.group_concurrency else {
            return Arc::new(HashMap::new());
        };
        let mut map = HashMap::new();
        for job in batch {
            map.entry(job.job_type.clone()).or_insert_with(|| Arc::new(Semaphore::new(limit)));
        }
        Arc::new(map)
    }
}

async fn process_one_job(
    backend: Arc<dyn Backend>,
    registry: Arc<HandlerRegistry>,
    job: Job,
    on_error: Option<OnError>,
) {
    let job_id = job.id;

    if !registry.has_handler(&job.job_type) {
        let reason = format!("no handler registered for job type `{}`", job.job_type);
        if let Err(err) = backend.mark_no_handler(&job.job_type, &reason).await {
            tracing::warn!(job_type = %job.job_type, %err, "failed to mark pending jobs with no-handler reason");
        }
        fail_job(backend.as_ref(), job_id, &reason, FailureReason::NoHandler, &on_error).await;
        return;
    }

    let isolated_mode = job.force_kill_on_timeout && job.timeout_ms.is_some_and(|ms| ms > 0);

    let outcome = if isolated_mode {
        match registry.isolated_handler(&job.job_type) {
            Some(handler) => run_isolated(handler, job.payload.clone(), job.timeout_ms.unwrap()).await,
            None => ExecutionOutcome::Failed {
                message: format!(
                    "job type `{}` has force_kill_on_timeout set but no isolated-mode handler is registered",
                    job.job_type
                ),
                reason: FailureReason::HandlerError,
            },
        }
    } else if let Some(handler) = registry.cooperative_handler(&job.job_type) {
        // Resume: resolve every pending `__wait_N` against the
        // backend before the handler replays from the top, so a job coming
        // back from `waiting` sees its step data fully settled.
        let step_data = match resolve_pending_waits(backend.as_ref(), &job).await {
            Ok(resolved) => resolved,
            Err(err) => {
                let message = format!("failed to resolve pending waits: {err}");
                fail_job(backend.as_ref(), job_id, &message, FailureReason::HandlerError, &on_error).await;
                return;
            }
        };

        let deadline_tx = job.timeout_ms.filter(|ms| *ms > 0).map(|ms| {
            let deadline = Instant::now() + StdDuration::from_millis(ms as u64);
            Arc::new(watch::channel(deadline).0)
        });
        let ctx = JobContext::new(job_id, backend.clone(), job.timeout_ms, deadline_tx, step_data);
        let result = run_cooperative(handler, job.payload.clone(), ctx.clone()).await;
        finish_outcome(backend.as_ref(), job_id, result, Some(&ctx), &on_error).await;
        return;
    } else {
        // Only an isolated handler registered, but force_kill_on_timeout
        // wasn't requested: still run it isolated if a timeout is set,
        // otherwise this job type can't be served cooperatively.
        match (registry.isolated_handler(&job.job_type), job.timeout_ms) {
            (Some(handler), Some(ms)) if ms > 0 => run_isolated(handler, job.payload.clone(), ms).await,
            _ => ExecutionOutcome::Failed {
                message: format!(
                    "job type `{}` is only registered as an isolated-mode handler and requires a positive timeout_ms",
                    job.job_type
                ),
                reason: FailureReason::HandlerError,
            },
        }
    };

    finish_outcome(backend.as_ref(), job_id, outcome, None, &on_error).await;
}

async fn finish_outcome(
    backend: &dyn Backend,
    job_id: JobId,
    outcome: ExecutionOutcome,
    ctx: Option<&JobContext>,
    on_error: &Option<OnError>,
) {
    match outcome {
        ExecutionOutcome::Completed(result) => {
            if let Err(err) = backend.complete(job_id).await {
                tracing::error!(job_id, %err, "failed to mark job completed");
            }
            let _ = backend.record_event(job_id, EventType::Completed, json!({"result": result})).await;
        }
        ExecutionOutcome::Suspended(req) => {
            let step_data = ctx.map(JobContext::snapshot_step_data).unwrap_or_else(|| Value::Object(Default::default()));
            let (wait_until, wait_token_id) = match req {
                WaitRequest::Time { wait_until } => (Some(wait_until), None),
                WaitRequest::Token { token_id } => (None, Some(token_id)),
            };
            if let Err(err) = backend.wait(job_id, wait_until, wait_token_id, step_data).await {
                tracing::error!(job_id, %err, "failed to transition job to waiting");
            }
            let metadata = json!({"wait_until": wait_until, "wait_token_id": wait_token_id});
            let _ = backend.record_event(job_id, EventType::Waiting, metadata).await;
        }
        ExecutionOutcome::Failed { message, reason } => {
            fail_job(backend, job_id, &message, reason, on_error).await;
        }
    }
}

async fn fail_job(
    backend: &dyn Backend,
    job_id: JobId,
    message: &str,
    reason: FailureReason,
    on_error: &Option<OnError>,
) {
    if let Err(err) = backend.fail(job_id, message, reason).await {
        tracing::error!(job_id, %err, "failed to persist job failure");
    }
    let metadata = json!({"message": message, "reason": reason});
    if let Err(err) = backend.record_event(job_id, EventType::Failed, metadata).await {
        tracing::warn!(job_id, %err, "failed to record failure event");
    }
    if let Some(cb) = on_error {
        cb(job_id, message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::model::{EnqueueOptions, JobStatus};
    use crate::orchestrator::OrchestratorSignal;
    use std::sync::atomic::AtomicUsize;

    fn registry_with_echo() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |payload: Value, _ctx: JobContext| async move {
            Ok::<Value, OrchestratorSignal>(payload)
        });
        registry
    }

    #[tokio::test]
    async fn start_claims_and_completes_a_batch() {
        let backend = Arc::new(MemoryBackend::new());
        backend.enqueue(EnqueueOptions::new("echo", json!({"x": 1}))).await.unwrap();
        backend.enqueue(EnqueueOptions::new("echo", json!({"x": 2}))).await.unwrap();

        let processor = Processor::new(backend.clone(), registry_with_echo(), ProcessorOptions::default()).unwrap();
        let count = processor.start().await.unwrap();
        assert_eq!(count, 2);

        let jobs = backend.get_all_jobs(10, 0).await.unwrap();
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    }

    #[tokio::test]
    async fn concurrency_pool_never_exceeds_configured_bound() {
        let backend = Arc::new(MemoryBackend::new());
        for i in 0..6 {
            backend.enqueue(EnqueueOptions::new("slow", json!({"i": i}))).await.unwrap();
        }

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let in_flight_for_handler = in_flight.clone();
        let max_for_handler = max_observed.clone();

        let mut registry = HandlerRegistry::new();
        registry.register("slow", move |payload: Value, _ctx: JobContext| {
            let in_flight = in_flight_for_handler.clone();
            let max_observed = max_for_handler.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(StdDuration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<Value, OrchestratorSignal>(payload)
            }
        });

        let mut options = ProcessorOptions::default();
        options.batch_size = 6;
        options.concurrency = 2;
        let processor = Processor::new(backend, registry, options).unwrap();
        processor.start().await.unwrap();

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unregistered_job_type_fails_with_no_handler_reason() {
        let backend = Arc::new(MemoryBackend::new());
        let id = backend.enqueue(EnqueueOptions::new("mystery", Value::Null)).await.unwrap();

        let processor = Processor::new(backend.clone(), HandlerRegistry::new(), ProcessorOptions::default()).unwrap();
        processor.start().await.unwrap();

        let job = backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_reason, Some(FailureReason::NoHandler));
    }

    #[tokio::test]
    async fn rejects_zero_group_concurrency_synchronously() {
        let backend = Arc::new(MemoryBackend::new());
        let mut options = ProcessorOptions::default();
        options.group_concurrency = Some(0);
        let err = Processor::new(backend, HandlerRegistry::new(), options).unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[tokio::test]
    async fn start_in_background_drains_on_stop() {
        let backend = Arc::new(MemoryBackend::new());
        backend.enqueue(EnqueueOptions::new("echo", Value::Null)).await.unwrap();
        let processor = Arc::new(Processor::new(backend.clone(), registry_with_echo(), ProcessorOptions::default()).unwrap());
        processor.start_in_background();
        assert!(processor.is_running());
        processor.stop_and_drain(1_000).await;
        assert!(!processor.is_running());
    }
}
