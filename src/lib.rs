pub mod capabilities;
pub mod cli;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod modules;
pub mod queue;
pub mod request;
pub mod runtime;
pub mod scope;

// Re-export the host-facing API
pub use capabilities::{BridgeCapability, Capability, ConsoleLevel, ConsoleSink, NativeCapability, Notifier};
pub use completion::{CompletionRecord, CompletionTracker};
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineHandle, EngineOption, EngineState, ExecutionStats};
pub use error::{ErrorKind, ExecutionError};
pub use request::ExecutionRequest;
