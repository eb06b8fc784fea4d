//! Step/Wait Orchestrator: memoized steps and suspend/resume
//! waitpoints, implemented by replaying the handler across invocations.
//!
//! `JobContext` (in [`crate::handler`]) owns the mutable `step_data` a
//! handler invocation accumulates; this module owns the shape of that data
//! and the two places it's read: inside a live invocation (`ctx.run`,
//! `ctx.wait_for`, ...) and at resume time, before the handler re-runs from
//! the top (`resolve_pending_waits`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use std::sync::atomic::Ordering;

use serde::de::DeserializeOwned;

use crate::backend::Backend;
use crate::duration::WaitDuration;
use crate::handler::context::JobContext;
use crate::model::{Job, WaitpointId, WaitpointStatus};

/// What a suspended handler invocation was waiting on, carried by
/// [`OrchestratorSignal::Suspend`]. The Runtime reads the context's
/// accumulated `step_data` separately and calls `Backend::wait` with
/// whichever field here is set.
#[derive(Debug, Clone)]
pub enum WaitRequest {
    Time { wait_until: DateTime<Utc> },
    Token { token_id: WaitpointId },
}

/// The control-flow type every handler body's `?` operator threads through.
/// Any mechanism that lets the Runtime distinguish {success, wait, failure}
/// satisfies the contract.
/// `Suspend` is *not* an error — the Runtime matches it out before touching
/// `onError`/`errorHistory`.
#[derive(Debug)]
pub enum OrchestratorSignal {
    Suspend(WaitRequest),
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for OrchestratorSignal {
    fn from(e: anyhow::Error) -> Self {
        OrchestratorSignal::Failed(e)
    }
}

impl From<crate::error::QueueError> for OrchestratorSignal {
    fn from(e: crate::error::QueueError) -> Self {
        OrchestratorSignal::Failed(e.into())
    }
}

impl std::fmt::Display for OrchestratorSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorSignal::Suspend(_) => write!(f, "handler suspended"),
            OrchestratorSignal::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// `ctx.waitForToken`'s resolved outcome, recorded into `__wait_N.result` and
/// handed back to the handler on replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResult {
    pub ok: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
}

pub(crate) fn get_step<'a>(step_data: &'a Value, name: &str) -> Option<&'a Value> {
    step_data.as_object().and_then(|m| m.get(name))
}

pub(crate) fn set_step(step_data: &mut Value, name: &str, entry: Value) {
    if !step_data.is_object() {
        *step_data = Value::Object(Default::default());
    }
    step_data.as_object_mut().unwrap().insert(name.to_string(), entry);
}

pub(crate) fn wait_key(index: usize) -> String {
    format!("__wait_{index}")
}

/// Resolve every pending `__wait_N` entry in `job.step_data` before the
/// handler replays from the top. Durations/dates are marked
/// completed unconditionally — we only reach resume once the instant has
/// passed. Tokens are fetched from the backend and their `{ok, output,
/// error}` outcome recorded.
///
/// Returns the updated `step_data`; callers persist it (and the
/// `processing` transition) via `Backend::claim_batch`'s own bookkeeping —
/// this function has no side effects beyond the waitpoint reads.
pub async fn resolve_pending_waits(backend: &dyn Backend, job: &Job) -> anyhow::Result<Value> {
    let mut step_data = job.step_data.clone();
    let keys: Vec<String> = step_data
        .as_object()
        .map(|m| m.keys().filter(|k| k.starts_with("__wait_")).cloned().collect())
        .unwrap_or_default();

    for key in keys {
        let entry = match get_step(&step_data, &key) {
            Some(e) => e.clone(),
            None => continue,
        };
        if entry.get("completed").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        let kind = entry.get("type").and_then(Value::as_str).unwrap_or("").to_string();
        match kind.as_str() {
            "duration" | "date" => {
                set_step(&mut step_data, &key, json!({"type": kind, "completed": true}));
            }
            "token" => {
                let token_id = entry
                    .get("tokenId")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<WaitpointId>().ok());
                if let Some(token_id) = token_id {
                    if let Some(wp) = backend.get_waitpoint(token_id).await? {
                        let result = match wp.status {
                            WaitpointStatus::Completed => {
                                TokenResult { ok: true, output: wp.output.clone(), error: None }
                            }
                            WaitpointStatus::TimedOut => TokenResult {
                                ok: false,
                                output: None,
                                error: Some("Token timed out".to_string()),
                            },
                            WaitpointStatus::Waiting => continue, // still pending; leave as-is
                        };
                        set_step(
                            &mut step_data,
                            &key,
                            json!({
                                "type": "token",
                                "tokenId": token_id,
                                "completed": true,
                                "result": result,
                            }),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    Ok(step_data)
}

impl JobContext {
    async fn persist_step_data(&self) {
        let snapshot = self.step_data.lock().unwrap().clone();
        if let Err(err) = self.backend.save_step_data(self.job_id, snapshot).await {
            tracing::warn!(job_id = self.job_id, %err, "failed to persist step data");
        }
    }

    fn next_wait_key(&self) -> String {
        let index = self.wait_counter.fetch_add(1, Ordering::SeqCst);
        wait_key(index)
    }

    /// `ctx.run(stepName, fn)`: step memoization. Replays the cached
    /// result when `stepName` is already marked `__completed`; otherwise
    /// runs `f`, memoizes the result, and persists immediately.
    ///
    /// Step names are the caller's responsibility to keep unique within a
    /// handler invocation — this is not enforced.
    pub async fn run<T, F, Fut>(&self, step_name: &str, f: F) -> Result<T, OrchestratorSignal>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        {
            let step_data = self.step_data.lock().unwrap();
            if let Some(entry) = get_step(&step_data, step_name) {
                if entry.get("__completed").and_then(Value::as_bool) == Some(true) {
                    let result = entry.get("result").cloned().unwrap_or(Value::Null);
                    return serde_json::from_value(result)
                        .map_err(|e| OrchestratorSignal::Failed(e.into()));
                }
            }
        }

        let result = f().await?;
        let encoded = serde_json::to_value(&result).map_err(anyhow::Error::from)?;
        {
            let mut step_data = self.step_data.lock().unwrap();
            set_step(&mut step_data, step_name, json!({"__completed": true, "result": encoded}));
        }
        self.persist_step_data().await;
        Ok(result)
    }

    /// `ctx.waitFor(duration)`. Suspends until `duration` has
    /// elapsed, replaying through on every resume until the Runtime's
    /// `resolve_pending_waits` has marked the corresponding `__wait_N`
    /// complete.
    pub async fn wait_for(&self, duration: WaitDuration) -> Result<(), OrchestratorSignal> {
        let wait_until = duration.from_now(Utc::now())?;
        self.wait_on_time("duration", wait_until).await
    }

    /// `ctx.waitUntil(date)`: an absolute-instant variant of
    /// [`JobContext::wait_for`].
    pub async fn wait_until(&self, at: DateTime<Utc>) -> Result<(), OrchestratorSignal> {
        self.wait_on_time("date", at).await
    }

    async fn wait_on_time(&self, kind: &str, wait_until: DateTime<Utc>) -> Result<(), OrchestratorSignal> {
        let key = self.next_wait_key();
        let already_completed = {
            let step_data = self.step_data.lock().unwrap();
            get_step(&step_data, &key)
                .and_then(|e| e.get("completed"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        if already_completed {
            return Ok(());
        }
        {
            let mut step_data = self.step_data.lock().unwrap();
            set_step(&mut step_data, &key, json!({"type": kind, "completed": false}));
        }
        Err(OrchestratorSignal::Suspend(WaitRequest::Time { wait_until }))
    }

    /// `ctx.waitForToken(tokenId)`. Probes the waitpoint
    /// synchronously on first encounter: an already-resolved token returns
    /// immediately without suspending; otherwise the invocation suspends
    /// until the token completes or times out.
    pub async fn wait_for_token(&self, token_id: WaitpointId) -> Result<TokenResult, OrchestratorSignal> {
        let key = self.next_wait_key();
        {
            let step_data = self.step_data.lock().unwrap();
            if let Some(entry) = get_step(&step_data, &key) {
                if entry.get("completed").and_then(Value::as_bool) == Some(true) {
                    let result = entry.get("result").cloned().unwrap_or(Value::Null);
                    return serde_json::from_value(result).map_err(|e| OrchestratorSignal::Failed(e.into()));
                }
            }
        }

        let waitpoint = self.backend.get_waitpoint(token_id).await?;
        let resolved = match waitpoint.as_ref().map(|w| w.status) {
            Some(WaitpointStatus::Completed) => Some(TokenResult {
                ok: true,
                output: waitpoint.and_then(|w| w.output),
                error: None,
            }),
            Some(WaitpointStatus::TimedOut) => {
                Some(TokenResult { ok: false, output: None, error: Some("Token timed out".to_string()) })
            }
            _ => None,
        };

        if let Some(result) = resolved {
            {
                let mut step_data = self.step_data.lock().unwrap();
                set_step(
                    &mut step_data,
                    &key,
                    json!({"type": "token", "tokenId": token_id, "completed": true, "result": result}),
                );
            }
            self.persist_step_data().await;
            return Ok(result);
        }

        {
            let mut step_data = self.step_data.lock().unwrap();
            set_step(&mut step_data, &key, json!({"type": "token", "tokenId": token_id, "completed": false}));
        }
        // Bind the (possibly free-standing) waitpoint to this job now, so
        // `complete_waitpoint`/`expire_timed_out_waitpoints` know to requeue
        // it later instead of leaving it stranded in `waiting`.
        self.backend.bind_waitpoint(token_id, self.job_id).await?;
        Err(OrchestratorSignal::Suspend(WaitRequest::Token { token_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::backend::memory::MemoryBackend;
    use crate::backend::Backend as _;
    use crate::model::{EnqueueOptions, JobStatus};

    async fn make_job(backend: &MemoryBackend, step_data: Value) -> Job {
        let id = backend.enqueue(EnqueueOptions::new("t", Value::Null)).await.unwrap();
        backend.save_step_data(id, step_data).await.unwrap();
        backend.get_job(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn duration_wait_resolves_unconditionally() {
        let backend = MemoryBackend::new();
        let job = make_job(&backend, json!({"__wait_0": {"type": "duration", "completed": false}})).await;
        let resolved = resolve_pending_waits(&backend, &job).await.unwrap();
        assert_eq!(get_step(&resolved, "__wait_0").unwrap()["completed"], json!(true));
    }

    #[tokio::test]
    async fn token_wait_pulls_waitpoint_output() {
        let backend = MemoryBackend::new();
        let wp = backend.create_waitpoint(None, None, vec![]).await.unwrap();
        backend.complete_waitpoint(wp.id, Some(json!({"status": "approved"}))).await.unwrap();
        let job = make_job(
            &backend,
            json!({"__wait_0": {"type": "token", "tokenId": wp.id, "completed": false}}),
        )
        .await;
        let resolved = resolve_pending_waits(&backend, &job).await.unwrap();
        let entry = get_step(&resolved, "__wait_0").unwrap();
        assert_eq!(entry["completed"], json!(true));
        assert_eq!(entry["result"]["ok"], json!(true));
        assert_eq!(entry["result"]["output"]["status"], json!("approved"));
    }

    #[tokio::test]
    async fn timed_out_token_records_error() {
        let backend = MemoryBackend::new();
        let wp = backend.create_waitpoint(None, Some(Utc::now()), vec![]).await.unwrap();
        backend.expire_timed_out_waitpoints().await.unwrap();
        let job = make_job(
            &backend,
            json!({"__wait_0": {"type": "token", "tokenId": wp.id, "completed": false}}),
        )
        .await;
        let resolved = resolve_pending_waits(&backend, &job).await.unwrap();
        let entry = get_step(&resolved, "__wait_0").unwrap();
        assert_eq!(entry["result"]["ok"], json!(false));
        assert_eq!(entry["result"]["error"], json!("Token timed out"));
    }

    #[tokio::test]
    async fn suspending_on_a_free_standing_token_binds_it_to_the_job() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let job_id = backend.enqueue(EnqueueOptions::new("t", Value::Null)).await.unwrap();
        let wp = backend.create_waitpoint(None, None, vec![]).await.unwrap();
        assert!(wp.job_id.is_none());

        let ctx = JobContext::new(job_id, backend.clone(), None, None, json!({}));
        let err = ctx.wait_for_token(wp.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorSignal::Suspend(WaitRequest::Token { token_id }) if token_id == wp.id));

        let bound = backend.get_waitpoint(wp.id).await.unwrap().unwrap();
        assert_eq!(bound.job_id, Some(job_id));

        backend.wait(job_id, None, Some(wp.id), json!({})).await.unwrap();
        backend.complete_waitpoint(wp.id, Some(json!({"ok": true}))).await.unwrap();
        let job = backend.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
