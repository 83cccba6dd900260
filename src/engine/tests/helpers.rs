//! Test helpers for engine tests
//!
//! Script trees in temp dirs and a console that remembers what it was told

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::capabilities::{BridgeCapability, ConsoleLevel, ConsoleSink};
use crate::config::EngineConfig;
use crate::engine::Engine;

#[derive(Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl RecordingConsole {
    pub fn errors(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == ConsoleLevel::Error)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn logs(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == ConsoleLevel::Log)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl ConsoleSink for RecordingConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

/// Write `files` (relative path, contents) under a fresh temp dir
pub fn script_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write script");
    }
    dir
}

/// Config that keeps the module root inside the temp dir and ignores the
/// process environment
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig::builder()
        .without_env()
        .module_root(Some(dir.join("node_modules")))
        .build()
        .expect("build test config")
}

/// An initialized engine writing to a recording console
pub fn engine_in(dir: &Path, bridge: BridgeCapability) -> (Engine, Arc<RecordingConsole>) {
    let console = Arc::new(RecordingConsole::default());
    let mut engine = Engine::builder()
        .config(test_config(dir))
        .console(console.clone())
        .bridge(bridge)
        .build()
        .expect("build engine");
    engine.init().expect("init engine");
    (engine, console)
}
