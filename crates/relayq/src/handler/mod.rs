//! The Handler Runtime: the `Handler` trait handlers implement, the
//! registry the Processor dispatches through, and the two execution modes —
//! cooperative (shared `JobContext`, soft timeout) and isolated (no shared
//! memory, hard kill timer).

pub mod context;
mod cooperative;
mod isolated;
mod registry;

pub use context::{AbortSignal, JobContext};
pub use registry::{BoxFuture, Handler, HandlerRegistry, IsolatableHandler};

pub(crate) use cooperative::run_cooperative;
pub(crate) use isolated::run_isolated;

use serde_json::Value;

use crate::model::FailureReason;
use crate::orchestrator::WaitRequest;

/// What a single handler invocation produced, independent of execution mode.
/// The Processor turns this into the matching `Backend` call (`complete`,
/// `wait`, or `fail`).
#[derive(Debug, Clone)]
pub(crate) enum ExecutionOutcome {
    Completed(Value),
    Suspended(WaitRequest),
    Failed { message: String, reason: FailureReason },
}
