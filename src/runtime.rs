//! The script runtime instance
//!
//! Wraps the QuickJS runtime and its single context. Created once per
//! engine, started by `init`, closed exactly once by `destroy`.

use rquickjs::{Context, Ctx, Runtime};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{catch_fault, ExecutionError, ScriptFault};
use crate::modules::{ModuleSession, SessionLoader, SessionResolver};
use crate::scope::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Running,
    Closed,
}

pub struct ScriptRuntime {
    state: RuntimeState,
    // Field order matters: the context must go before its runtime
    context: Option<Context>,
    runtime: Option<Runtime>,
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRuntime {
    pub fn new() -> Self {
        Self {
            state: RuntimeState::Uninitialized,
            context: None,
            runtime: None,
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RuntimeState::Running
    }

    /// Create the runtime, apply limits and hook up interruption and loading
    pub fn start(&mut self, config: &EngineConfig, stop: Arc<StopSignal>, session: ModuleSession) -> Result<(), ExecutionError> {
        match self.state {
            RuntimeState::Running => return Ok(()),
            RuntimeState::Closed => return Err(ExecutionError::Disposed),
            RuntimeState::Uninitialized => {}
        }

        let runtime = Runtime::new().map_err(|err| start_failure("create runtime", err))?;
        if config.memory_limit_bytes > 0 {
            runtime.set_memory_limit(config.memory_limit_bytes as usize);
        }
        if config.max_stack_size_bytes > 0 {
            runtime.set_max_stack_size(config.max_stack_size_bytes as usize);
        }
        if config.gc_threshold_bytes > 0 {
            runtime.set_gc_threshold(config.gc_threshold_bytes as usize);
        }
        runtime.set_interrupt_handler(Some(Box::new(move || stop.is_requested())));
        runtime.set_loader(SessionResolver::new(session.clone()), SessionLoader::new(session));

        let context = Context::full(&runtime).map_err(|err| start_failure("create context", err))?;

        self.runtime = Some(runtime);
        self.context = Some(context);
        self.state = RuntimeState::Running;
        info!(
            memory_limit = config.memory_limit_bytes,
            max_stack = config.max_stack_size_bytes,
            "Script runtime started"
        );
        Ok(())
    }

    /// Run `f` inside the script context
    pub fn with<F, R>(&self, f: F) -> Result<R, ExecutionError>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        match (&self.state, &self.context) {
            (RuntimeState::Running, Some(context)) => Ok(context.with(f)),
            (RuntimeState::Closed, _) => Err(ExecutionError::Disposed),
            _ => Err(ExecutionError::NotInitialized),
        }
    }

    /// Run up to `slice` pending runtime jobs. Returns how many ran.
    pub(crate) fn advance(&self, slice: usize) -> Result<usize, ScriptFault> {
        let (Some(runtime), Some(context)) = (&self.runtime, &self.context) else {
            return Ok(0);
        };

        let mut ran = 0;
        while ran < slice {
            match runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(_) => {
                    // The job's exception is still pending on our only context
                    return Err(context.with(|ctx| catch_fault(&ctx, rquickjs::Error::Exception)));
                }
            }
        }
        Ok(ran)
    }

    pub fn is_job_pending(&self) -> bool {
        self.runtime.as_ref().is_some_and(|runtime| runtime.is_job_pending())
    }

    /// Low-memory hint before teardown
    pub fn run_gc(&self) {
        if let Some(runtime) = &self.runtime {
            runtime.run_gc();
        }
    }

    /// Close the runtime. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == RuntimeState::Closed {
            return;
        }
        self.context = None;
        self.runtime = None;
        self.state = RuntimeState::Closed;
        debug!("Script runtime closed");
    }
}

fn start_failure(what: &str, err: rquickjs::Error) -> ExecutionError {
    ExecutionError::Runtime {
        message: format!("failed to {}: {}", what, err),
        stack: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> ScriptRuntime {
        let mut runtime = ScriptRuntime::new();
        runtime
            .start(
                &EngineConfig::default(),
                Arc::new(StopSignal::new()),
                ModuleSession::new("/tmp"),
            )
            .unwrap();
        runtime
    }

    #[test]
    fn test_state_transitions() {
        let mut runtime = ScriptRuntime::new();
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
        assert!(matches!(runtime.with(|_| ()), Err(ExecutionError::NotInitialized)));

        runtime = started();
        assert!(runtime.is_running());

        runtime.close();
        runtime.close();
        assert_eq!(runtime.state(), RuntimeState::Closed);
        assert!(matches!(runtime.with(|_| ()), Err(ExecutionError::Disposed)));
        assert!(matches!(
            runtime.start(&EngineConfig::default(), Arc::new(StopSignal::new()), ModuleSession::new("/tmp")),
            Err(ExecutionError::Disposed)
        ));
    }

    #[test]
    fn test_advance_respects_job_slice() {
        let runtime = started();
        runtime
            .with(|ctx| {
                ctx.eval::<(), _>("for (let i = 0; i < 5; i++) Promise.resolve(i).then(() => {});")
                    .unwrap()
            })
            .unwrap();

        assert_eq!(runtime.advance(2).unwrap(), 2);
        assert!(runtime.is_job_pending());
        assert_eq!(runtime.advance(10).unwrap(), 3);
        assert_eq!(runtime.advance(10).unwrap(), 0);
    }

    #[test]
    fn test_interrupt_follows_stop_signal() {
        let stop = Arc::new(StopSignal::new());
        let mut runtime = ScriptRuntime::new();
        runtime
            .start(&EngineConfig::default(), stop.clone(), ModuleSession::new("/tmp"))
            .unwrap();

        stop.request();
        let result = runtime.with(|ctx| ctx.eval::<(), _>("while (true) {}").is_err()).unwrap();
        assert!(result);
    }
}
