//! Embedded script execution engine
//!
//! The engine owns the runtime instance, the module session, the capability
//! registry, the native call queue and the completion tracker, and is the
//! only thing the host talks to:
//!
//! ```text
//! Engine::builder() -> init() -> execute(request)* -> destroy()
//!                                     ^ force_stop() from any thread
//! ```
//!
//! The engine itself is `!Send`: it lives on one owning thread/task. Use
//! `EngineHandle` to stop it from elsewhere.

mod entry;
mod pump;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::{
    BridgeCapability, Capability, CapabilityEnv, CapabilityRegistry, ConsoleCapability, ConsoleSink,
    NotificationCapability, Notifier, TimerCapability, TracingConsole,
};
use crate::completion::{CompletionRecord, CompletionTracker};
use crate::config::EngineConfig;
use crate::error::ExecutionError;
use crate::marshal::MarshalPolicy;
use crate::modules::{prepare_module_root, ModuleSession};
use crate::queue::{NativeCallQueue, NativeCallSender};
use crate::request::ExecutionRequest;
use crate::runtime::ScriptRuntime;
use crate::scope::{StopSignal, TaskScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Initialized,
    Executing,
    /// Between executions
    Idle,
    Destroyed,
}

/// Settings the host can change between executions. Last write wins; values
/// are only read when the next `execute` starts.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOption {
    /// Secondary dependency root
    ModuleRoot(PathBuf),
    /// Base directory for the entry and top-level `require`, instead of the
    /// script's own directory
    WorkingDirectory(PathBuf),
    /// Runtime jobs per pump iteration
    JobSlice(usize),
    /// Exposed to scripts as the global `scriptArgs`
    ScriptArgs(Vec<String>),
    MarshalDepth(usize),
}

#[derive(Debug, Clone, Default)]
struct EngineOptions {
    module_root: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    job_slice: Option<usize>,
    script_args: Vec<String>,
    marshal_depth: Option<usize>,
}

impl EngineOptions {
    fn apply(&mut self, option: EngineOption) {
        match option {
            EngineOption::ModuleRoot(path) => self.module_root = Some(path),
            EngineOption::WorkingDirectory(path) => self.working_dir = Some(path),
            EngineOption::JobSlice(slice) => self.job_slice = Some(slice),
            EngineOption::ScriptArgs(args) => self.script_args = args,
            EngineOption::MarshalDepth(depth) => self.marshal_depth = Some(depth),
        }
    }
}

/// Counters for one `execute` call
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStats {
    pub execution_id: Uuid,
    pub path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pump_iterations: u64,
    pub jobs_run: u64,
    pub native_calls_run: u64,
}

impl ExecutionStats {
    fn start(path: &Path) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            path: path.to_path_buf(),
            started_at: Utc::now(),
            finished_at: None,
            pump_iterations: 0,
            jobs_run: 0,
            native_calls_run: 0,
        }
    }
}

/* ===================== Handle ===================== */

/// Thread-safe stop control for an engine
#[derive(Clone)]
pub struct EngineHandle {
    engine_id: Uuid,
    stop: Arc<StopSignal>,
    tracker: CompletionTracker,
    scope: Arc<TaskScope>,
}

impl EngineHandle {
    /// Request cancellation of the current (or next) execution.
    ///
    /// Sets the stop signal (which also interrupts running script code),
    /// cancels the completion tracker and aborts outstanding native work.
    /// Repeated calls are no-ops.
    pub fn force_stop(&self) {
        if !self.stop.request() {
            debug!(engine_id = %self.engine_id, "Stop already requested");
            return;
        }
        info!(engine_id = %self.engine_id, "Force stop requested");
        self.tracker.cancel();
        self.scope.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_requested()
    }
}

/* ===================== Builder ===================== */

/// Builder for constructing an Engine
pub struct EngineBuilder {
    config: EngineConfig,
    console: Arc<dyn ConsoleSink>,
    notifier: Option<Arc<dyn Notifier>>,
    bridge: BridgeCapability,
    extra: Vec<(String, Capability)>,
    runtime_handle: Option<Handle>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            console: Arc::new(TracingConsole),
            notifier: None,
            bridge: BridgeCapability::new(),
            extra: Vec::new(),
            runtime_handle: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Console collaborator for script output and execution errors
    pub fn console(mut self, sink: Arc<dyn ConsoleSink>) -> Self {
        self.console = sink;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Host functions reachable through `native.call`
    pub fn bridge(mut self, bridge: BridgeCapability) -> Self {
        self.bridge = bridge;
        self
    }

    /// Register an additional capability after the built-in ones. A name
    /// that is already taken replaces the earlier entry.
    pub fn capability(mut self, name: impl Into<String>, capability: impl Into<Capability>) -> Self {
        self.extra.push((name.into(), capability.into()));
        self
    }

    /// Tokio runtime for native async work. Defaults to the current runtime,
    /// or a small owned one when built outside of any runtime.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<Engine, ExecutionError> {
        let mut registry = CapabilityRegistry::new();
        let enabled = &self.config.capabilities;
        if enabled.console {
            registry.register_default(ConsoleCapability::new(self.console.clone()));
        }
        if enabled.bridge {
            registry.register_default(self.bridge);
        }
        if enabled.timers {
            registry.register_default(TimerCapability::new());
        }
        if enabled.notification {
            let capability = match self.notifier {
                Some(notifier) => NotificationCapability::new(notifier),
                None => NotificationCapability::default(),
            };
            registry.register_default(capability);
        }
        for (name, capability) in self.extra {
            registry.register(name, capability);
        }

        let id = Uuid::new_v4();
        let scope = Arc::new(TaskScope::new(self.runtime_handle)?);
        debug!(engine_id = %id, capabilities = ?registry.names(), "Engine created");

        Ok(Engine {
            id,
            state: EngineState::Created,
            policy: MarshalPolicy::new(self.config.marshal_max_depth),
            session: ModuleSession::new(self.config.module_root.clone()),
            config: self.config,
            options: EngineOptions::default(),
            runtime: ScriptRuntime::new(),
            registry,
            queue: NativeCallQueue::new(),
            tracker: CompletionTracker::new(),
            stop: Arc::new(StopSignal::new()),
            scope,
            console: self.console,
            last_stats: None,
        })
    }
}

/* ===================== Engine ===================== */

pub struct Engine {
    id: Uuid,
    state: EngineState,
    config: EngineConfig,
    options: EngineOptions,
    policy: MarshalPolicy,
    runtime: ScriptRuntime,
    session: ModuleSession,
    registry: CapabilityRegistry,
    queue: NativeCallQueue,
    tracker: CompletionTracker,
    stop: Arc<StopSignal>,
    scope: Arc<TaskScope>,
    console: Arc<dyn ConsoleSink>,
    last_stats: Option<ExecutionStats>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            engine_id: self.id,
            stop: self.stop.clone(),
            tracker: self.tracker.clone(),
            scope: self.scope.clone(),
        }
    }

    /// Producer side of the native call queue, for host code that wants to
    /// run work on the runtime thread
    pub fn native_calls(&self) -> NativeCallSender {
        self.queue.sender()
    }

    pub fn last_stats(&self) -> Option<&ExecutionStats> {
        self.last_stats.as_ref()
    }

    /// Store an option for the next execution
    pub fn configure(&mut self, option: EngineOption) {
        debug!(engine_id = %self.id, ?option, "Engine option set");
        self.options.apply(option);
    }

    /// Install the marshalling policy, prepare the module root and install
    /// every registered capability. Only valid once.
    pub fn init(&mut self) -> Result<(), ExecutionError> {
        match self.state {
            EngineState::Created => {}
            EngineState::Destroyed => return Err(ExecutionError::Disposed),
            _ => return Err(ExecutionError::AlreadyInitialized),
        }

        self.policy.set_max_depth(self.config.marshal_max_depth);

        let module_root = self.module_root()?;
        if self.config.synthesize_manifests {
            prepare_module_root(&module_root)
                .map_err(|err| ExecutionError::Io(std::io::Error::other(format!("{:#}", err))))?;
        }

        self.runtime
            .start(&self.config, self.stop.clone(), self.session.clone())?;

        let env = CapabilityEnv {
            sender: self.queue.sender(),
            scope: self.scope.clone(),
            policy: self.policy.clone(),
        };
        let registry = &self.registry;
        self.runtime
            .with(|ctx| registry.install_all(&ctx, &ctx.globals(), &env))??;

        self.state = EngineState::Initialized;
        info!(
            engine_id = %self.id,
            module_root = %module_root.display(),
            capabilities = self.registry.len(),
            "Engine initialized"
        );
        Ok(())
    }

    /// Run one script to completion and return its completion value.
    ///
    /// Every error is reported once to the console collaborator before it
    /// is returned.
    pub async fn execute(&mut self, request: ExecutionRequest) -> Result<JsonValue, ExecutionError> {
        match self.state {
            EngineState::Initialized | EngineState::Idle => {}
            EngineState::Created => return self.report(Err(ExecutionError::NotInitialized)),
            EngineState::Destroyed => return self.report(Err(ExecutionError::Disposed)),
            EngineState::Executing => {
                return self.report(Err(ExecutionError::InvalidRequest(
                    "an execution is already in progress".to_string(),
                )))
            }
        }

        self.state = EngineState::Executing;
        let mut stats = ExecutionStats::start(request.path());
        info!(
            engine_id = %self.id,
            execution_id = %stats.execution_id,
            path = %request.path().display(),
            form = ?request.form(),
            "Execution started"
        );

        let result = self.run(&request, &mut stats).await;
        self.finish(&mut stats, &result);
        self.last_stats = Some(stats);
        self.report(result)
    }

    /// Convenience wrapper: build the request from a path, then execute
    pub async fn execute_path(&mut self, path: impl AsRef<Path>) -> Result<JsonValue, ExecutionError> {
        match ExecutionRequest::new(path) {
            Ok(request) => self.execute(request).await,
            Err(err) => self.report(Err(err)),
        }
    }

    /// Same as `EngineHandle::force_stop`
    pub fn force_stop(&self) {
        self.handle().force_stop();
    }

    /// Release capabilities, stop native work and close the runtime.
    /// A no-op once destroyed.
    pub fn destroy(&mut self) {
        if self.state == EngineState::Destroyed {
            return;
        }

        if self.runtime.is_running() {
            let registry = &self.registry;
            if let Err(err) = self.runtime.with(|ctx| registry.release_all(&ctx, &ctx.globals())) {
                warn!(engine_id = %self.id, error = %err, "Could not release capabilities");
            }
        }
        self.tracker.cancel();
        self.scope.close();
        self.queue.discard();
        self.runtime.run_gc();
        self.runtime.close();
        self.state = EngineState::Destroyed;
        info!(engine_id = %self.id, "Engine destroyed");
    }

    async fn run(&mut self, request: &ExecutionRequest, stats: &mut ExecutionStats) -> Result<JsonValue, ExecutionError> {
        if self.stop.is_requested() {
            return Err(ExecutionError::Cancelled);
        }

        let stale = self.queue.discard();
        if stale > 0 {
            debug!(execution_id = %stats.execution_id, stale, "Dropped callbacks from an earlier execution");
        }

        if let Some(depth) = self.options.marshal_depth {
            self.policy.set_max_depth(depth);
        }
        let module_root = self.module_root()?;
        let base_dir = self
            .options
            .working_dir
            .clone()
            .unwrap_or_else(|| request.working_dir().to_path_buf());
        self.session.begin(&base_dir, &module_root);
        // A force_stop that landed after the previous execution finished
        // may have cancelled the tracker late
        self.tracker.reset();

        self.start_entry(request)?;

        let job_slice = self.options.job_slice.unwrap_or(self.config.job_slice).max(1);
        self.pump(job_slice, stats).await?;

        if self.stop.is_requested() {
            return Err(ExecutionError::Cancelled);
        }
        match self.tracker.await_completion().await {
            CompletionRecord::Fulfilled(value) => Ok(value),
            CompletionRecord::Rejected { reason, stack } => Err(self.rejection_error(reason, stack)),
            CompletionRecord::Cancelled => Err(ExecutionError::Cancelled),
        }
    }

    fn finish(&mut self, stats: &mut ExecutionStats, result: &Result<JsonValue, ExecutionError>) {
        if result.is_err() {
            // Abandon whatever native work the failed execution left behind
            self.scope.cancel();
            self.queue.discard();
        }

        stats.finished_at = Some(Utc::now());
        self.stop.clear();
        self.scope.renew();
        self.state = EngineState::Idle;

        let elapsed_ms = stats
            .finished_at
            .map(|end| (end - stats.started_at).num_milliseconds())
            .unwrap_or_default();
        info!(
            engine_id = %self.id,
            execution_id = %stats.execution_id,
            ok = result.is_ok(),
            elapsed_ms,
            pump_iterations = stats.pump_iterations,
            jobs_run = stats.jobs_run,
            native_calls_run = stats.native_calls_run,
            "Execution finished"
        );
    }

    /// Log an outgoing error through the console collaborator
    fn report(&self, result: Result<JsonValue, ExecutionError>) -> Result<JsonValue, ExecutionError> {
        if let Err(err) = &result {
            debug!(engine_id = %self.id, kind = ?err.kind(), engine_fault = err.is_engine_fault(), "Reporting execution error");
            self.console.error(&err.diagnostic());
        }
        result
    }

    fn module_root(&self) -> Result<PathBuf, ExecutionError> {
        let root = self
            .options
            .module_root
            .clone()
            .unwrap_or_else(|| self.config.module_root.clone());
        if root.is_absolute() {
            Ok(root)
        } else {
            Ok(std::env::current_dir()?.join(root))
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
#[path = "tests/mod.rs"]
mod tests;
