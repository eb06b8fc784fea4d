//! Isolated timeout model: run the handler with no shared memory to the
//! caller and a hard kill timer with no graceful handoff.
//!
//! A real language-level "isolate" (separate heap, forcibly terminable) has
//! no safe Rust equivalent for arbitrary code — we approximate it with a
//! plain OS thread that owns the payload by value and reports back through
//! a one-shot channel. On timeout we stop waiting and fail the job; we do
//! not attempt to kill the thread (Rust has no safe primitive for that), so
//! a misbehaving isolated handler can continue running in the background
//! after its job has already been marked `failed`. This is the same
//! trade-off every "hard timeout over a thread" implementation in the
//! ecosystem makes absent a real subprocess boundary.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value;

use crate::model::FailureReason;

use super::registry::IsolatedHandlerFn;
use super::ExecutionOutcome;

pub(crate) async fn run_isolated(handler: IsolatedHandlerFn, payload: Value, timeout_ms: i64) -> ExecutionOutcome {
    let join = tokio::task::spawn_blocking(move || {
        let rt = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        rt.block_on((handler)(payload))
    });

    match tokio::time::timeout(StdDuration::from_millis(timeout_ms.max(0) as u64), join).await {
        Ok(Ok(Ok(value))) => ExecutionOutcome::Completed(value),
        Ok(Ok(Err(err))) => ExecutionOutcome::Failed { message: err.to_string(), reason: FailureReason::HandlerError },
        Ok(Err(join_err)) => ExecutionOutcome::Failed {
            message: format!("isolated handler thread panicked: {join_err}"),
            reason: FailureReason::HandlerError,
        },
        Err(_elapsed) => {
            // The blocking-pool thread is abandoned here: Rust has no safe
            // way to forcibly terminate it, so a runaway isolated handler
            // keeps running to completion (or forever) off in the
            // threadpool after we've already reported this job as failed.
            ExecutionOutcome::Failed {
                message: "handler timed out".to_string(),
                reason: FailureReason::Timeout,
            }
        }
    }
}

/// Sandbox entry: wait/step primitives have no `JobContext` to attach to in
/// isolated mode, so any attempt to use them must fail the job with a
/// descriptive message rather than a confusing missing-method error.
pub(crate) fn wait_primitives_unavailable_message() -> String {
    "wait/step primitives are not available to isolated-mode handlers".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn boxed(
        f: impl Fn(Value) -> super::super::registry::BoxFuture<'static, anyhow::Result<Value>> + Send + Sync + 'static,
    ) -> IsolatedHandlerFn {
        Arc::new(f)
    }

    #[tokio::test]
    async fn completes_within_the_timeout() {
        let handler = boxed(|payload| Box::pin(async move { Ok(payload) }));
        let outcome = run_isolated(handler, json!({"x": 1}), 1_000).await;
        match outcome {
            ExecutionOutcome::Completed(v) => assert_eq!(v, json!({"x": 1})),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn exceeding_the_timeout_fails_with_timeout_reason() {
        let handler = boxed(|_payload| {
            Box::pin(async move {
                tokio::time::sleep(StdDuration::from_millis(200)).await;
                Ok(Value::Null)
            })
        });
        let outcome = run_isolated(handler, Value::Null, 20).await;
        match outcome {
            ExecutionOutcome::Failed { reason, .. } => assert_eq!(reason, FailureReason::Timeout),
            _ => panic!("expected timeout failure"),
        }
    }

    #[tokio::test]
    async fn handler_error_is_reported_as_handler_error() {
        let handler = boxed(|_payload| Box::pin(async move { Err(anyhow::anyhow!("boom")) }));
        let outcome = run_isolated(handler, Value::Null, 1_000).await;
        match outcome {
            ExecutionOutcome::Failed { reason, message } => {
                assert_eq!(reason, FailureReason::HandlerError);
                assert!(message.contains("boom"));
            }
            _ => panic!("expected handler error"),
        }
    }
}
