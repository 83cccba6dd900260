//! `console` capability and the console collaborator interface

use rquickjs::function::{Func, Rest};
use rquickjs::{Ctx, Object, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{define_global, remove_global, CapabilityEnv, NativeCapability};
use crate::marshal::MarshalPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

/// Where script console output and engine diagnostics end up
pub trait ConsoleSink: Send + Sync {
    fn write(&self, level: ConsoleLevel, message: &str);

    fn error(&self, message: &str) {
        self.write(ConsoleLevel::Error, message);
    }
}

/// Default sink: tracing events under the `script` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl ConsoleSink for TracingConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Debug => debug!(target: "script", "{}", message),
            ConsoleLevel::Log | ConsoleLevel::Info => info!(target: "script", "{}", message),
            ConsoleLevel::Warn => warn!(target: "script", "{}", message),
            ConsoleLevel::Error => error!(target: "script", "{}", message),
        }
    }
}

pub struct ConsoleCapability {
    sink: Arc<dyn ConsoleSink>,
}

impl ConsoleCapability {
    pub fn new(sink: Arc<dyn ConsoleSink>) -> Self {
        Self { sink }
    }
}

impl Default for ConsoleCapability {
    fn default() -> Self {
        Self::new(Arc::new(TracingConsole))
    }
}

const METHODS: [(&str, ConsoleLevel); 5] = [
    ("log", ConsoleLevel::Log),
    ("info", ConsoleLevel::Info),
    ("warn", ConsoleLevel::Warn),
    ("error", ConsoleLevel::Error),
    ("debug", ConsoleLevel::Debug),
];

impl NativeCapability for ConsoleCapability {
    fn install<'js>(&self, ctx: &Ctx<'js>, globals: &Object<'js>, env: &CapabilityEnv) -> rquickjs::Result<()> {
        let console = Object::new(ctx.clone())?;
        for (method, level) in METHODS {
            let sink = self.sink.clone();
            let policy = env.policy.clone();
            console.set(
                method,
                Func::from(move |args: Rest<Value<'js>>| -> rquickjs::Result<()> {
                    let line = format_args_line(&policy, &args)?;
                    sink.write(level, &line);
                    Ok(())
                }),
            )?;
        }
        define_global(ctx, globals, "console", console)
    }

    fn release<'js>(&self, _ctx: &Ctx<'js>, globals: &Object<'js>) -> rquickjs::Result<()> {
        remove_global(globals, "console")
    }
}

/// Join console arguments the way a terminal console prints them: strings
/// raw, everything else as JSON
fn format_args_line<'js>(policy: &MarshalPolicy, args: &[Value<'js>]) -> rquickjs::Result<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        if arg.is_undefined() {
            parts.push("undefined".to_string());
            continue;
        }
        if arg.is_function() {
            parts.push("[Function]".to_string());
            continue;
        }
        match policy.to_json(arg)? {
            serde_json::Value::String(s) => parts.push(s),
            other => parts.push(other.to_string()),
        }
    }
    Ok(parts.join(" "))
}
