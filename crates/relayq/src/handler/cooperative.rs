//! Cooperative timeout model: race the handler future against a
//! re-armable deadline. `JobContext::prolong` and the `onTimeout` reactive
//! callback both re-arm the same `tokio::sync::watch` channel, so "exactly
//! one pending timer exists" falls out of there being exactly one
//! `watch::Receiver` driving the `select!` loop below.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use serde_json::Value;
use tokio::time::Instant;

use crate::model::FailureReason;
use crate::orchestrator::OrchestratorSignal;

use super::context::JobContext;
use super::registry::Handler;
use super::ExecutionOutcome;

fn outcome_from_result(res: Result<Value, OrchestratorSignal>) -> ExecutionOutcome {
    match res {
        Ok(value) => ExecutionOutcome::Completed(value),
        Err(OrchestratorSignal::Suspend(req)) => ExecutionOutcome::Suspended(req),
        Err(OrchestratorSignal::Failed(err)) => {
            ExecutionOutcome::Failed { message: err.to_string(), reason: FailureReason::HandlerError }
        }
    }
}

pub(crate) async fn run_cooperative(
    handler: Arc<dyn Handler>,
    payload: Value,
    ctx: JobContext,
) -> ExecutionOutcome {
    let mut deadline_rx = ctx.deadline_tx.as_ref().map(|tx| tx.subscribe());
    let handler_fut = handler.handle(payload, ctx.clone());
    tokio::pin!(handler_fut);

    let Some(deadline_rx) = deadline_rx.as_mut() else {
        return outcome_from_result((&mut handler_fut).await);
    };

    loop {
        let deadline: Instant = *deadline_rx.borrow();
        tokio::select! {
            biased;
            res = &mut handler_fut => return outcome_from_result(res),
            _ = tokio::time::sleep_until(deadline) => {
                match ctx.fire_on_timeout() {
                    Some(extension_ms) => {
                        let new_deadline = Instant::now() + StdDuration::from_millis(extension_ms as u64);
                        if let Some(tx) = &ctx.deadline_tx {
                            let _ = tx.send(new_deadline);
                        }
                        ctx.refresh_lease().await;
                    }
                    None => {
                        ctx.abort_signal().trigger();
                        return ExecutionOutcome::Failed {
                            message: format!("job {} timed out", ctx.job_id()),
                            reason: FailureReason::Timeout,
                        };
                    }
                }
            }
            _ = deadline_rx.changed() => {}
        }
    }
}
