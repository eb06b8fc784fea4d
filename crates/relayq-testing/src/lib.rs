//! Test fixtures for exercising a [`relayq::Queue`] end to end: a harness
//! over [`MemoryBackend`](relayq::backend::memory::MemoryBackend), a
//! handful of stock handlers, and polling helpers for assertions against
//! async state a single `Processor::start()` call doesn't settle in one
//! shot (retries, waitpoints, cron).
//!
//! Mirrors the role `seesaw-testing` plays for `seesaw-core` consumers:
//! a thin crate downstream tests depend on instead of hand-rolling the
//! same backend-plus-registry boilerplate in every test module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value;

use relayq::backend::memory::MemoryBackend;
use relayq::handler::JobContext;
use relayq::model::{Job, JobId, JobStatus};
use relayq::orchestrator::OrchestratorSignal;
use relayq::{HandlerRegistry, Processor, ProcessorOptions, Queue};

/// An in-process [`Queue`] over a fresh [`MemoryBackend`], plus the backend
/// handle itself for assertions that need to read rows directly.
pub struct TestQueue {
    pub queue: Queue,
    pub backend: Arc<MemoryBackend>,
}

impl Default for TestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TestQueue {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        Self { queue: Queue::new(backend.clone()), backend }
    }

    /// Builds a [`Processor`] wired to this harness's backend, panicking on
    /// invalid configuration — tests only ever construct one deliberately.
    pub fn processor(&self, handlers: HandlerRegistry, options: ProcessorOptions) -> Processor {
        self.queue.create_processor(handlers, options).expect("valid processor options")
    }

    /// Runs `processor.start()` in a loop, up to `max_cycles` times, until
    /// `job_id` reaches `status` or a terminal status it didn't ask for.
    /// Needed wherever a job takes more than one claim cycle to settle —
    /// a retry waiting on backoff, a waitpoint timeout, a cron tick —
    /// since `MemoryBackend` has no injectable clock to fast-forward.
    pub async fn run_until_status(
        &self,
        processor: &Processor,
        job_id: JobId,
        status: JobStatus,
        max_cycles: usize,
        poll_interval: StdDuration,
    ) -> Job {
        for _ in 0..max_cycles {
            processor.start().await.expect("processor cycle");
            let job = self.backend.get_job(job_id).await.unwrap().expect("job exists");
            if job.status == status {
                return job;
            }
            tokio::time::sleep(poll_interval).await;
        }
        panic!("job {job_id} did not reach {status:?} within {max_cycles} cycles");
    }
}

/// A cooperative handler that echoes its payload back as the result.
pub fn echo_handler() -> impl relayq::handler::Handler {
    EchoHandler
}

struct EchoHandler;

#[async_trait::async_trait]
impl relayq::handler::Handler for EchoHandler {
    async fn handle(&self, payload: Value, _ctx: JobContext) -> Result<Value, OrchestratorSignal> {
        Ok(payload)
    }
}

/// A cooperative handler that always fails with `message`, useful for
/// exercising the retry/backoff and dead-letter paths without depending on
/// a handler's real business logic.
pub fn failing_handler(message: impl Into<String>) -> impl relayq::handler::Handler {
    FailingHandler { message: message.into() }
}

struct FailingHandler {
    message: String,
}

#[async_trait::async_trait]
impl relayq::handler::Handler for FailingHandler {
    async fn handle(&self, _payload: Value, _ctx: JobContext) -> Result<Value, OrchestratorSignal> {
        Err(OrchestratorSignal::Failed(anyhow::anyhow!(self.message.clone())))
    }
}

/// A cooperative handler that fails its first `flaky_attempts` invocations
/// (counting from 1) and then succeeds, for exercising retry-then-recover
/// scenarios in a single registered handler.
pub fn flaky_handler(flaky_attempts: usize) -> impl relayq::handler::Handler {
    FlakyHandler { flaky_attempts, seen: AtomicUsize::new(0) }
}

struct FlakyHandler {
    flaky_attempts: usize,
    seen: AtomicUsize,
}

#[async_trait::async_trait]
impl relayq::handler::Handler for FlakyHandler {
    async fn handle(&self, payload: Value, _ctx: JobContext) -> Result<Value, OrchestratorSignal> {
        let attempt = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.flaky_attempts {
            return Err(OrchestratorSignal::Failed(anyhow::anyhow!("flaky attempt {attempt}")));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayq::model::FailureReason;
    use relayq::AddJobOptions;

    #[tokio::test]
    async fn echo_handler_completes_the_job() {
        let harness = TestQueue::new();
        let id = harness.queue.add_job(AddJobOptions::new("echo", Value::from("hi"))).await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("echo", echo_handler());
        let processor = harness.processor(registry, ProcessorOptions::default());
        processor.start().await.unwrap();

        let job = harness.backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn failing_handler_records_handler_error() {
        let harness = TestQueue::new();
        let id = harness.queue.add_job(AddJobOptions::new("boom", Value::Null)).await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("boom", failing_handler("nope"));
        let processor = harness.processor(registry, ProcessorOptions::default());
        processor.start().await.unwrap();

        let job = harness.backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_reason, Some(FailureReason::HandlerError));
    }

    #[tokio::test]
    async fn flaky_handler_recovers_after_retry() {
        let harness = TestQueue::new();
        let id = harness.queue.add_job(AddJobOptions::new("flaky", Value::Null)).await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register("flaky", flaky_handler(1));
        let processor = harness.processor(registry, ProcessorOptions::default());

        processor.start().await.unwrap();
        let job = harness.backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);

        harness.queue.retry_job(id).await.unwrap();
        processor.start().await.unwrap();
        let job = harness.backend.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}
