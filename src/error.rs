//! Error types for script execution
//!
//! `ExecutionError` is the tagged result the engine hands back to the host.
//! Each variant maps onto one `ErrorKind` so callers can tell "the script's
//! own logic failed" apart from "the engine could not run the script".

use rquickjs::{Coerced, Ctx, Exception, FromJs, Value};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an `ExecutionError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Lifecycle misuse or an unusable request
    Configuration,
    /// A module specifier could not be resolved under either root
    Resolution,
    /// A module failed to parse
    Compile,
    /// The runtime raised an exception outside of the top-level promise
    RuntimeExecution,
    /// The top-level result rejected
    ScriptRejection,
    /// `force_stop` fired before the execution completed
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("engine is not initialized - call init() before execute()")]
    NotInitialized,

    #[error("engine is already initialized")]
    AlreadyInitialized,

    #[error("engine has been disposed")]
    Disposed,

    #[error("invalid execution request: {0}")]
    InvalidRequest(String),

    #[error("capability '{name}' failed to install: {message}")]
    CapabilityInstall { name: String, message: String },

    #[error("cannot resolve module '{specifier}' from '{base}'")]
    Resolution { specifier: String, base: String },

    #[error("failed to compile {}: {message}", path.display())]
    Compile { path: PathBuf, message: String },

    #[error("uncaught exception: {message}")]
    Runtime {
        message: String,
        stack: Option<String>,
    },

    #[error("script rejected: {}", display_reason(reason))]
    ScriptRejected {
        reason: JsonValue,
        stack: Option<String>,
    },

    #[error("execution was cancelled")]
    Cancelled,

    #[error("execution stalled: the top-level promise is pending with no work left to run")]
    Stalled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::NotInitialized
            | ExecutionError::AlreadyInitialized
            | ExecutionError::Disposed
            | ExecutionError::InvalidRequest(_)
            | ExecutionError::CapabilityInstall { .. }
            | ExecutionError::Io(_) => ErrorKind::Configuration,
            ExecutionError::Resolution { .. } => ErrorKind::Resolution,
            ExecutionError::Compile { .. } => ErrorKind::Compile,
            ExecutionError::Runtime { .. } | ExecutionError::Stalled => {
                ErrorKind::RuntimeExecution
            }
            ExecutionError::ScriptRejected { .. } => ErrorKind::ScriptRejection,
            ExecutionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True when the engine malfunctioned, false when the script itself
    /// rejected or was cancelled by the host
    pub fn is_engine_fault(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::ScriptRejection | ErrorKind::Cancelled
        )
    }

    /// Diagnostic stack trace attached to the error, if any
    pub fn stack(&self) -> Option<&str> {
        match self {
            ExecutionError::Runtime { stack, .. } | ExecutionError::ScriptRejected { stack, .. } => {
                stack.as_deref()
            }
            _ => None,
        }
    }

    /// The single line (or block) written to the console collaborator
    pub fn diagnostic(&self) -> String {
        match self.stack() {
            Some(stack) => format!("{}\n{}", self, stack),
            None => self.to_string(),
        }
    }
}

fn display_reason(reason: &JsonValue) -> String {
    match reason {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/* ===================== Script Faults ===================== */

/// An exception pulled out of the runtime, flattened to owned strings
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptFault {
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptFault {
    pub fn into_runtime_error(self) -> ExecutionError {
        ExecutionError::Runtime {
            message: self.message,
            stack: self.stack,
        }
    }
}

/// Turn an `rquickjs::Error` into a fault, catching the pending exception
/// when the error is a thrown JS value
pub(crate) fn catch_fault<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> ScriptFault {
    match err {
        rquickjs::Error::Exception => describe_value(ctx, ctx.catch()),
        other => ScriptFault {
            message: other.to_string(),
            stack: None,
        },
    }
}

/// Describe an arbitrary thrown or rejected value
pub(crate) fn describe_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> ScriptFault {
    if let Some(obj) = value.as_object() {
        if let Some(exception) = Exception::from_object(obj.clone()) {
            let name: String = obj
                .get::<_, Coerced<String>>("name")
                .map(|name| name.0)
                .unwrap_or_else(|_| "Error".to_string());
            let message = match exception.message() {
                Some(message) if !message.is_empty() => format!("{}: {}", name, message),
                _ => name,
            };
            return ScriptFault {
                message,
                stack: exception.stack().filter(|stack| !stack.trim().is_empty()),
            };
        }
    }

    let message = match Coerced::<String>::from_js(ctx, value) {
        Ok(text) => text.0,
        Err(err) => format!("(unprintable exception: {})", err),
    };
    ScriptFault {
        message,
        stack: None,
    }
}
