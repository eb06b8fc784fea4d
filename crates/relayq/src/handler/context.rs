//! [`JobContext`]: the handle a handler body uses to talk back to the
//! engine — timeout prolongation/reaction, progress reporting, and
//! (via `impl JobContext` in [`crate::orchestrator`]) the step/wait
//! primitives.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::backend::Backend;
use crate::duration::WaitDuration;
use crate::error::QueueError;
use crate::model::{JobId, Waitpoint};

/// The cancellation channel a cooperative handler observes:
/// `is_aborted`/`aborted` reflect the Runtime's
/// decision to give up on this invocation, whether from a final timeout or
/// (in a future extension) explicit cancellation.
#[derive(Clone)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self { aborted: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`AbortSignal::trigger`] has been called. Already-true
    /// callers return immediately rather than missing the notification.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        self.notify.notified().await;
    }

    pub(crate) fn trigger(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

type OnTimeoutCallback = Box<dyn Fn() -> Option<i64> + Send + Sync>;

/// Handed to every cooperative-mode handler invocation. Cheap to clone —
/// everything inside is shared state with the Runtime's supervising task.
#[derive(Clone)]
pub struct JobContext {
    pub(crate) job_id: JobId,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) abort: AbortSignal,
    /// `None` when the job carries no `timeout_ms` — `prolong`/`on_timeout`
    /// are then no-ops.
    pub(crate) deadline_tx: Option<Arc<watch::Sender<Instant>>>,
    pub(crate) original_timeout_ms: Option<i64>,
    pub(crate) on_timeout_cb: Arc<Mutex<Option<OnTimeoutCallback>>>,
    pub(crate) step_data: Arc<Mutex<Value>>,
    pub(crate) wait_counter: Arc<AtomicUsize>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        backend: Arc<dyn Backend>,
        original_timeout_ms: Option<i64>,
        deadline_tx: Option<Arc<watch::Sender<Instant>>>,
        step_data: Value,
    ) -> Self {
        Self {
            job_id,
            backend,
            abort: AbortSignal::new(),
            deadline_tx,
            original_timeout_ms,
            on_timeout_cb: Arc::new(Mutex::new(None)),
            step_data: Arc::new(Mutex::new(step_data)),
            wait_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Re-arms the timeout timer from now, for `ms` milliseconds (defaults
    /// to the job's original `timeout_ms`), and fires a best-effort
    /// `Backend::prolong` to refresh the claim lease. No-op when the job
    /// has no timeout.
    pub fn prolong(&self, ms: Option<i64>) {
        let Some(tx) = &self.deadline_tx else { return };
        let duration_ms = ms.or(self.original_timeout_ms).unwrap_or(0);
        if duration_ms <= 0 {
            return;
        }
        let new_deadline = Instant::now() + StdDuration::from_millis(duration_ms as u64);
        let _ = tx.send(new_deadline);

        let backend = self.backend.clone();
        let job_id = self.job_id;
        tokio::spawn(async move {
            let _ = backend.prolong(job_id).await;
        });
    }

    /// Registers the reactive timeout callback. Only the most recent
    /// registration is honored — "a single reactive
    /// callback" per invocation.
    pub fn on_timeout<F>(&self, cb: F)
    where
        F: Fn() -> Option<i64> + Send + Sync + 'static,
    {
        *self.on_timeout_cb.lock().unwrap() = Some(Box::new(cb));
    }

    /// Invoked by the cooperative timer loop when the deadline elapses.
    /// Returns `Some(extension_ms)` when the callback asked for more time,
    /// `None` to let the timeout stand. A panicking callback is treated as
    /// "no extension" and logged.
    pub(crate) fn fire_on_timeout(&self) -> Option<i64> {
        let cb = self.on_timeout_cb.lock().unwrap();
        let cb = cb.as_ref()?;
        match std::panic::catch_unwind(AssertUnwindSafe(|| cb())) {
            Ok(extension) => extension.filter(|ms| *ms > 0),
            Err(_) => {
                tracing::error!(job_id = self.job_id, "onTimeout callback panicked; no extension granted");
                None
            }
        }
    }

    /// Persists `n` (must be `0..=100`) to the job row as progress.
    /// Out-of-range input fails synchronously, before any Backend call.
    pub async fn set_progress(&self, n: i32) -> Result<(), QueueError> {
        if !(0..=100).contains(&n) {
            return Err(QueueError::Config(format!("progress {n} is out of range 0..=100")));
        }
        self.backend.set_progress(self.job_id, n).await.map_err(QueueError::Backend)
    }

    /// Convenience wrapper over `Backend::create_waitpoint` for handlers
    /// that mint a token mid-step. The token is
    /// free-standing (`job_id: None`) unless the handler later binds it via
    /// `wait_for_token`.
    pub async fn create_token(
        &self,
        timeout: Option<WaitDuration>,
        tags: Vec<String>,
    ) -> Result<Waitpoint, QueueError> {
        let timeout_at = match timeout {
            Some(d) => Some(d.from_now(Utc::now()).map_err(|_| {
                QueueError::Config("waitFor duration must sum to a positive value".to_string())
            })?),
            None => None,
        };
        self.backend.create_waitpoint(None, timeout_at, tags).await.map_err(QueueError::Backend)
    }

    pub(crate) fn snapshot_step_data(&self) -> Value {
        self.step_data.lock().unwrap().clone()
    }

    pub(crate) async fn refresh_lease(&self) {
        let _ = self.backend.prolong(self.job_id).await;
    }
}
