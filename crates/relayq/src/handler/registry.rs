//! The `Handler` trait, the isolated-mode marker trait, and the job-type →
//! handler map the Processor dispatches through.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::orchestrator::OrchestratorSignal;

use super::context::JobContext;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A cooperative-mode handler: receives the payload and a [`JobContext`]
/// for prolongation, progress, and step/wait primitives. Blanket-implemented
/// for any `async fn(Value, JobContext) -> Result<Value, OrchestratorSignal>`
/// closure so registration reads like a plain function pointer.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, payload: Value, ctx: JobContext) -> Result<Value, OrchestratorSignal>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OrchestratorSignal>> + Send + 'static,
{
    async fn handle(&self, payload: Value, ctx: JobContext) -> Result<Value, OrchestratorSignal> {
        (self)(payload, ctx).await
    }
}

/// Implemented only by capture-less function items and closures: `Copy`
/// excludes anything holding `Arc`/`Rc`/interior-mutable captured state,
/// which is the closest static equivalent — in a compiled, statically typed
/// language — to "statically reject non-serializable handlers before
/// launching." Isolated-mode handlers get no `JobContext`; wait features
/// aren't available to them.
pub trait IsolatableHandler:
    Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Copy + Send + Sync + 'static
{
}

impl<T> IsolatableHandler for T where
    T: Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Copy + Send + Sync + 'static
{
}

pub(crate) type IsolatedHandlerFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Job-type → handler map. A job type is registered exactly once, as either
/// a cooperative [`Handler`] or an isolated-mode function; `Processor`
/// chooses which to invoke (isolated when `force_kill_on_timeout` is set
/// and `timeout_ms > 0`, cooperative by default).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    cooperative: HashMap<String, Arc<dyn Handler>>,
    isolated: HashMap<String, IsolatedHandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cooperative handler for `job_type`.
    pub fn register<H: Handler>(&mut self, job_type: impl Into<String>, handler: H) -> &mut Self {
        self.cooperative.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Register an isolated-mode handler for `job_type`. `H` must satisfy
    /// [`IsolatableHandler`] — a closure that captures shared state (an
    /// `Arc<...>`, a `Mutex`, anything non-`Copy`) fails to compile here,
    /// which is this crate's static enforcement of "no shared memory to the
    /// caller."
    pub fn register_isolated<H: IsolatableHandler>(&mut self, job_type: impl Into<String>, handler: H) -> &mut Self {
        self.isolated.insert(job_type.into(), Arc::new(handler));
        self
    }

    pub(crate) fn cooperative_handler(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.cooperative.get(job_type).cloned()
    }

    pub(crate) fn isolated_handler(&self, job_type: &str) -> Option<IsolatedHandlerFn> {
        self.isolated.get(job_type).cloned()
    }

    pub(crate) fn has_handler(&self, job_type: &str) -> bool {
        self.cooperative.contains_key(job_type) || self.isolated.contains_key(job_type)
    }
}
