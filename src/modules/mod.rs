//! Module resolution and loading
//!
//! One `ModuleSession` lives for the engine's lifetime and is restarted by
//! every `execute`. It owns the per-session module cache, the filesystem
//! resolver and the most recent load failure, and is shared by the QuickJS
//! resolver/loader pair and the CommonJS `require` hooks.
//!
//! QuickJS keeps every linked ES module for the life of its context, keyed
//! by module name. Module names therefore carry the session generation
//! (`/app/main.mjs?session=3`), so each execution links its own instances
//! and sees current file contents.

mod classic;
mod loader;
mod manifest;
mod resolve;

pub use manifest::prepare_module_root;
pub use resolve::{classify, ImportKind, ModuleResolver, ResolveError};

pub(crate) use classic::install_require;
pub(crate) use loader::{SessionLoader, SessionResolver};

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

use crate::error::ExecutionError;

const SESSION_MARKER: &str = "?session=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleForm {
    /// Loaded synchronously through `require`
    Classic,
    /// Compiled and linked with `import`/`export`
    Esm,
}

/// A module known to the current session
#[derive(Debug, Clone)]
pub struct CachedModule {
    pub form: ModuleForm,
    pub source: Rc<str>,
}

#[derive(Debug)]
struct SessionState {
    resolver: ModuleResolver,
    base_dir: PathBuf,
    cache: HashMap<PathBuf, CachedModule>,
    failure: Option<ExecutionError>,
    generation: u64,
}

/// Shared, single-threaded module session
#[derive(Debug, Clone)]
pub struct ModuleSession {
    state: Rc<RefCell<SessionState>>,
}

impl ModuleSession {
    pub fn new(module_root: impl Into<PathBuf>) -> Self {
        let module_root = module_root.into();
        Self {
            state: Rc::new(RefCell::new(SessionState {
                base_dir: module_root.clone(),
                resolver: ModuleResolver::new(module_root),
                cache: HashMap::new(),
                failure: None,
                generation: 0,
            })),
        }
    }

    /// Start a fresh session rooted at `base_dir`
    pub fn begin(&self, base_dir: &Path, module_root: &Path) {
        let mut state = self.state.borrow_mut();
        state.base_dir = base_dir.to_path_buf();
        state.resolver = ModuleResolver::new(module_root);
        state.cache.clear();
        state.failure = None;
        state.generation += 1;
        debug!(
            base = %base_dir.display(),
            module_root = %module_root.display(),
            generation = state.generation,
            "Module session started"
        );
    }

    pub fn base_dir(&self) -> PathBuf {
        self.state.borrow().base_dir.clone()
    }

    /// ES module name for `path` in the current session
    pub fn module_name(&self, path: &Path) -> String {
        format!("{}{}{}", path.display(), SESSION_MARKER, self.state.borrow().generation)
    }

    /// Directory that relative specifiers from `referrer` resolve against.
    /// Anything that is not a real file path (eval'd code) uses the session base.
    pub fn dir_of(&self, referrer: Option<&str>) -> PathBuf {
        referrer
            .map(path_of)
            .filter(|path| path.is_absolute() && path.is_file())
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir())
    }

    /// Resolve a specifier, recording a failure for the engine to report
    pub fn resolve(&self, specifier: &str, referrer: Option<&str>, kind: ImportKind) -> Result<PathBuf, ResolveError> {
        let from_dir = self.dir_of(referrer);
        let result = self.state.borrow().resolver.resolve(specifier, &from_dir, kind);
        if let Err(err) = &result {
            debug!(specifier, base = %from_dir.display(), error = %err, "Module resolution failed");
            self.record_failure(ExecutionError::Resolution {
                specifier: specifier.to_string(),
                base: from_dir.display().to_string(),
            });
        }
        result
    }

    /// Register a module before its body runs, so cyclic imports find it
    pub fn register(&self, path: &Path, form: ModuleForm, source: Rc<str>) {
        self.state
            .borrow_mut()
            .cache
            .insert(path.to_path_buf(), CachedModule { form, source });
    }

    pub fn cached(&self, path: &Path) -> Option<CachedModule> {
        self.state.borrow().cache.get(path).cloned()
    }

    /// Read and classify a module, serving repeats from the cache
    pub fn fetch(&self, path: &Path) -> std::io::Result<CachedModule> {
        if let Some(module) = self.cached(path) {
            return Ok(module);
        }
        let source: Rc<str> = fs::read_to_string(path)?.into();
        let form = classify(path);
        self.register(path, form, source.clone());
        Ok(CachedModule { form, source })
    }

    pub fn cache_len(&self) -> usize {
        self.state.borrow().cache.len()
    }

    pub fn record_failure(&self, failure: ExecutionError) {
        self.state.borrow_mut().failure = Some(failure);
    }

    /// Record a compile failure unless the error is really a resolution
    /// failure already recorded for one of the module's imports
    pub fn record_compile_failure(&self, path: &Path, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.state.borrow_mut();
        if let Some(ExecutionError::Resolution { specifier, .. }) = &state.failure {
            if message.contains(specifier.as_str()) {
                return;
            }
        }
        state.failure = Some(ExecutionError::Compile {
            path: path.to_path_buf(),
            message,
        });
    }

    /// Take the recorded failure if the surfaced error message refers to it.
    ///
    /// A script may catch a failed import and carry on; only a failure that
    /// is actually what surfaced gets reported as a resolution/compile error.
    pub fn take_failure_for(&self, message: &str) -> Option<ExecutionError> {
        let mut state = self.state.borrow_mut();
        let matches = match &state.failure {
            Some(ExecutionError::Resolution { specifier, .. }) => message.contains(specifier.as_str()),
            Some(ExecutionError::Compile { path, .. }) => message.contains(&path.display().to_string()),
            _ => false,
        };
        if matches {
            state.failure.take()
        } else {
            None
        }
    }
}

/// File path behind a module name, with any session marker removed
pub(crate) fn path_of(name: &str) -> &Path {
    match name.rsplit_once(SESSION_MARKER) {
        Some((path, generation)) if !generation.is_empty() && generation.bytes().all(|b| b.is_ascii_digit()) => {
            Path::new(path)
        }
        _ => Path::new(name),
    }
}
