//! Dispatch path for foreign operator callbacks.
//!
//! [`CustomOpEngine::push`] is the single entry point the invocation layer uses. In naive mode
//! the callback runs inline on the pushing thread. In pooled mode the call is wrapped into a
//! task and queued for the worker pool, which installs the task's recording/training flags
//! around the callback and restores the worker's own values afterwards.
//!
//! Either way, once the callback returns, sparse outputs are rebound to the caller's handles
//! and the completion signal fires exactly once. A callback that fails or panics still fires
//! the completion signal, with the error, and leaves the pool serving other tasks.
//!
//! ## Lifecycle
//!
//! [`CustomOpEngine::get`] lazily creates the process-wide engine from the environment.
//! Workers are spawned only when work is pushed. Statics are never dropped, so runtime
//! teardown must call [`CustomOpEngine::shutdown`] on the global engine explicitly. Pushing
//! after shutdown is rejected with [`EngineError::ShutDown`].

mod context;
pub mod downstream;
mod task;

use std::fmt;
use std::sync::{Arc, OnceLock};

pub use context::{Device, OpContext};
pub use downstream::{DownstreamEngine, FinalizeJob, InlineEngine, FINALIZE_JOB_NAME};
pub use task::SparseBindings;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::flags::ExecFlags;
use crate::op::{CustomOpProp, OpPropCreator};
use crate::pool::{PoolStats, WorkerPool};
use crate::registry::OperatorRegistry;
use task::{finish, run_guarded, Task};

static GLOBAL_ENGINE: OnceLock<CustomOpEngine> = OnceLock::new();

pub struct CustomOpEngine {
    config: EngineConfig,
    registry: OperatorRegistry,
    pool: Option<WorkerPool>,
    downstream: Option<Arc<dyn DownstreamEngine>>,
}

impl CustomOpEngine {
    /// Builds an engine. Pooled engines start with no workers.
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let pool = (!config.is_naive()).then(|| WorkerPool::new(config.max_workers));
        tracing::debug!(
            kind = ?config.kind,
            max_workers = config.max_workers,
            "created custom operator engine"
        );
        CustomOpEngine {
            config,
            registry: OperatorRegistry::new(),
            pool,
            downstream: None,
        }
    }

    /// Routes the finalize step of pooled tasks through `engine`. Ignored in naive mode.
    pub fn with_downstream(mut self, engine: Arc<dyn DownstreamEngine>) -> Self {
        self.downstream = Some(engine);
        self
    }

    /// Process-wide engine, created from the environment on first use.
    pub fn get() -> &'static CustomOpEngine {
        GLOBAL_ENGINE.get_or_init(|| CustomOpEngine::new(EngineConfig::from_env()))
    }

    /// Installs `engine` as the process-wide engine, which must not have been created yet.
    pub fn install(engine: CustomOpEngine) -> EngineResult<&'static CustomOpEngine> {
        GLOBAL_ENGINE
            .set(engine)
            .map_err(|_| EngineError::AlreadyInitialized)?;
        Ok(Self::get())
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn is_naive(&self) -> bool {
        self.pool.is_none()
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// See [`OperatorRegistry::register`].
    pub fn register(
        &self,
        op_type: impl Into<String>,
        creator: OpPropCreator,
    ) -> Option<OpPropCreator> {
        self.registry.register(op_type, creator)
    }

    /// See [`OperatorRegistry::find`].
    pub fn find(&self, op_type: &str) -> Option<OpPropCreator> {
        self.registry.find(op_type)
    }

    /// See [`OperatorRegistry::create`].
    pub fn create(
        &self,
        op_type: &str,
        kwargs: &[(String, String)],
    ) -> EngineResult<Box<dyn CustomOpProp>> {
        self.registry.create(op_type, kwargs)
    }

    /// Submits one operator call.
    ///
    /// `flags` are the recording/training values the callback must observe. `bindings`
    /// describe the handles involved and which sparse outputs to rebind afterwards. Returns
    /// once the call has run (naive mode) or has been queued (pooled mode); the outcome of the
    /// callback itself is delivered to `ctx`'s completion signal.
    pub fn push<F>(
        &self,
        func: F,
        ctx: OpContext,
        flags: ExecFlags,
        bindings: SparseBindings,
    ) -> EngineResult<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        bindings.validate()?;

        let Some(pool) = &self.pool else {
            let outcome = run_guarded(Box::new(func));
            finish(outcome, bindings, ctx);
            return Ok(());
        };

        let task = Task {
            func: Box::new(func),
            flags,
            bindings,
            ctx,
            downstream: self.downstream.clone(),
        };
        pool.submit(Box::new(move || task.run()))
    }

    /// Spawns up to `delta` extra workers ahead of demand, clamped to the configured cap.
    ///
    /// Returns the number of workers started; always zero in naive mode or after shutdown.
    pub fn grow_by(&self, delta: usize) -> usize {
        self.pool.as_ref().map_or(0, |pool| pool.grow_by(delta))
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.as_ref().map(WorkerPool::stats).unwrap_or_default()
    }

    /// Drains queued tasks and joins all workers. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

impl fmt::Debug for CustomOpEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOpEngine")
            .field("config", &self.config)
            .field("pool", &self.pool_stats())
            .field("downstream", &self.downstream.is_some())
            .finish()
    }
}
