//! Starting the entry module and wiring its result to the tracker

use rquickjs::function::Func;
use rquickjs::{Ctx, Function, Module, Object, Value};
use serde_json::Value as JsonValue;
use std::fs;
use std::rc::Rc;
use tracing::debug;

use super::Engine;
use crate::completion::CompletionTracker;
use crate::error::{catch_fault, describe_value, ExecutionError, ScriptFault};
use crate::marshal::MarshalPolicy;
use crate::modules::{install_require, ModuleForm, ModuleSession};
use crate::request::ExecutionRequest;
use crate::scope::StopSignal;

/// Settles `ok`/`err` with the completion value: the default export for a
/// module, the value itself otherwise
const OBSERVE: &str = r#"
(value, namespace, ok, err) => {
  Promise.resolve(value)
    .then((result) => (namespace === undefined ? result : namespace.default))
    .then(ok, err);
}
"#;

impl Engine {
    /// Install a fresh `require`, start the entry module and attach the
    /// completion tracker to its result
    pub(super) fn start_entry(&mut self, request: &ExecutionRequest) -> Result<(), ExecutionError> {
        let session = self.session.clone();
        let tracker = self.tracker.clone();
        let policy = self.policy.clone();
        let stop = self.stop.clone();
        let script_args = self.options.script_args.clone();

        self.runtime.with(|ctx| {
            let started = (|| -> rquickjs::Result<Result<(), ExecutionError>> {
                let entry = install_require(&ctx, &session)?;
                ctx.globals().set("scriptArgs", script_args)?;

                match request.form() {
                    ModuleForm::Esm => start_module(&ctx, &session, &tracker, &policy, request),
                    ModuleForm::Classic => start_classic(&ctx, &entry, &tracker, &policy, request).map(Ok),
                }
            })();

            match started {
                Ok(result) => result,
                Err(err) => Err(fault_error(&session, &stop, catch_fault(&ctx, err))),
            }
        })?
    }

    /// Map a rejected completion, preferring a recorded load failure that
    /// the rejection is about
    pub(super) fn rejection_error(&self, reason: JsonValue, stack: Option<String>) -> ExecutionError {
        let text = match &reason {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.session
            .take_failure_for(&text)
            .unwrap_or(ExecutionError::ScriptRejected { reason, stack })
    }
}

fn start_module<'js>(
    ctx: &Ctx<'js>,
    session: &ModuleSession,
    tracker: &CompletionTracker,
    policy: &MarshalPolicy,
    request: &ExecutionRequest,
) -> rquickjs::Result<Result<(), ExecutionError>> {
    let path = request.path();
    let source: Rc<str> = match fs::read_to_string(path) {
        Ok(source) => source.into(),
        Err(err) => return Ok(Err(err.into())),
    };
    let name = session.module_name(path);

    // Registered before evaluation so a cycle back to the entry finds it
    session.register(path, ModuleForm::Esm, source.clone());

    let declared = match Module::declare(ctx.clone(), name.as_str(), source.as_bytes().to_vec()) {
        Ok(declared) => declared,
        Err(err) => {
            // Declaring links the imports too, so this may be a missing dependency
            let fault = catch_fault(ctx, err);
            return Ok(Err(session.take_failure_for(&fault.message).unwrap_or_else(|| {
                ExecutionError::Compile {
                    path: path.to_path_buf(),
                    message: fault.message,
                }
            })));
        }
    };
    let (evaluated, promise) = declared.eval()?;
    let namespace = evaluated.namespace()?;
    debug!(module = %name, "Entry module evaluated");

    observe(ctx, tracker, policy, promise.as_value().clone(), namespace.as_value().clone())?;
    Ok(Ok(()))
}

fn start_classic<'js>(
    ctx: &Ctx<'js>,
    entry: &Function<'js>,
    tracker: &CompletionTracker,
    policy: &MarshalPolicy,
    request: &ExecutionRequest,
) -> rquickjs::Result<()> {
    let path = request.path().to_string_lossy().into_owned();
    let module: Object = entry.call((path,))?;

    let returned: Value = module.get("result")?;
    let value = if returned.is_undefined() {
        module.get::<_, Value>("exports")?
    } else {
        returned
    };

    if value.is_promise() {
        return observe(ctx, tracker, policy, value, Value::new_undefined(ctx.clone()));
    }
    settle_fulfilled(ctx, tracker, policy, &value);
    Ok(())
}

/// Settle with `value`, or reject with the error converting it threw
fn settle_fulfilled<'js>(ctx: &Ctx<'js>, tracker: &CompletionTracker, policy: &MarshalPolicy, value: &Value<'js>) {
    match policy.to_json(value) {
        Ok(json) => {
            tracker.on_fulfilled(json);
        }
        Err(err) => settle_unconvertible(ctx, tracker, err),
    }
}

fn settle_unconvertible(ctx: &Ctx<'_>, tracker: &CompletionTracker, err: rquickjs::Error) {
    let fault = catch_fault(ctx, err);
    debug!(error = %fault.message, "Completion value could not be converted");
    tracker.on_rejected(JsonValue::String(fault.message), fault.stack);
}

fn observe<'js>(
    ctx: &Ctx<'js>,
    tracker: &CompletionTracker,
    policy: &MarshalPolicy,
    value: Value<'js>,
    namespace: Value<'js>,
) -> rquickjs::Result<()> {
    let on_ok = {
        let tracker = tracker.clone();
        let policy = policy.clone();
        Func::from(move |ctx: Ctx<'js>, value: Value<'js>| {
            settle_fulfilled(&ctx, &tracker, &policy, &value);
        })
    };
    let on_err = {
        let tracker = tracker.clone();
        let policy = policy.clone();
        Func::from(move |ctx: Ctx<'js>, reason: Value<'js>| {
            let fault = describe_value(&ctx, reason.clone());
            match policy.to_json(&reason) {
                Ok(json) => {
                    tracker.on_rejected(json, fault.stack);
                }
                Err(err) => settle_unconvertible(&ctx, &tracker, err),
            }
        })
    };

    let observe: Function = ctx.eval(OBSERVE)?;
    observe.call((value, namespace, on_ok, on_err))
}

/// Classify a synchronous failure while starting the entry
fn fault_error(session: &ModuleSession, stop: &StopSignal, fault: ScriptFault) -> ExecutionError {
    if stop.is_requested() {
        return ExecutionError::Cancelled;
    }
    session
        .take_failure_for(&fault.message)
        .unwrap_or_else(|| fault.into_runtime_error())
}
