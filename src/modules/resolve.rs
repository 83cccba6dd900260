//! Filesystem module resolution
//!
//! A specifier is tried against the importing file's directory first and
//! the fixed module root second. For each base, a path `P` is tried as
//! `P`, `P` plus a known extension, a package directory, then an index file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::trace;

use super::ModuleForm;

const EXTENSIONS: [&str; 4] = ["js", "mjs", "cjs", "json"];
const INDEX_FILES: [&str; 2] = ["index.js", "index.mjs"];
const MANIFEST: &str = "package.json";

/// Which loader asked, which decides the package entry field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    /// Static or dynamic `import`: prefers the manifest's `module` field
    Import,
    /// CommonJS `require`: only the manifest's `main` field
    Require,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("Cannot find module '{specifier}' from '{}'", base.display())]
    NotFound { specifier: String, base: PathBuf },

    #[error("Remote module '{0}' is not supported")]
    Remote(String),
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(rename = "type")]
    kind: Option<String>,
    main: Option<String>,
    module: Option<String>,
}

fn read_manifest(path: &Path) -> Option<Manifest> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Resolves specifiers for one execution session
#[derive(Debug, Clone)]
pub struct ModuleResolver {
    module_root: PathBuf,
}

impl ModuleResolver {
    pub fn new(module_root: impl Into<PathBuf>) -> Self {
        Self {
            module_root: module_root.into(),
        }
    }

    /// Resolve `specifier` as seen from a file in `from_dir`
    pub fn resolve(&self, specifier: &str, from_dir: &Path, kind: ImportKind) -> Result<PathBuf, ResolveError> {
        if specifier.starts_with("http:") || specifier.starts_with("https:") {
            return Err(ResolveError::Remote(specifier.to_string()));
        }
        let specifier_path = Path::new(specifier.strip_prefix("file://").unwrap_or(specifier));

        let found = if specifier_path.is_absolute() {
            self.candidate(specifier_path, kind)
        } else {
            self.candidate(&from_dir.join(specifier_path), kind)
                .or_else(|| self.candidate(&self.module_root.join(specifier_path), kind))
        };

        match found {
            Some(path) => {
                let path = path.canonicalize().unwrap_or(path);
                trace!(specifier, path = %path.display(), "Resolved module");
                Ok(path)
            }
            None => Err(ResolveError::NotFound {
                specifier: specifier.to_string(),
                base: from_dir.to_path_buf(),
            }),
        }
    }

    fn candidate(&self, path: &Path, kind: ImportKind) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if let Some(found) = with_extension(path) {
            return Some(found);
        }
        if path.is_dir() {
            return self.package_entry(path, kind);
        }
        None
    }

    fn package_entry(&self, dir: &Path, kind: ImportKind) -> Option<PathBuf> {
        if let Some(manifest) = read_manifest(&dir.join(MANIFEST)) {
            let fields = match kind {
                ImportKind::Import => [manifest.module, manifest.main],
                ImportKind::Require => [None, manifest.main],
            };
            for entry in fields.into_iter().flatten() {
                let entry = dir.join(entry);
                if entry.is_file() {
                    return Some(entry);
                }
                if let Some(found) = with_extension(&entry) {
                    return Some(found);
                }
                if let Some(found) = index_file(&entry) {
                    return Some(found);
                }
            }
        }
        index_file(dir)
    }
}

fn with_extension(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    EXTENSIONS
        .iter()
        .map(|ext| path.with_file_name(format!("{}.{}", name, ext)))
        .find(|candidate| candidate.is_file())
}

fn index_file(dir: &Path) -> Option<PathBuf> {
    INDEX_FILES.iter().map(|index| dir.join(index)).find(|candidate| candidate.is_file())
}

/// Classify a file as classic or ECMAScript module form.
///
/// `.mjs` is always a module and `.cjs`/`.json` are always classic. Any other
/// file follows the nearest enclosing `package.json`: `"type": "module"`
/// makes it a module, anything else (or no manifest at all) keeps it classic.
pub fn classify(path: &Path) -> ModuleForm {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("mjs") => return ModuleForm::Esm,
        Some("cjs") | Some("json") => return ModuleForm::Classic,
        _ => {}
    }

    for dir in path.ancestors().skip(1) {
        let manifest_path = dir.join(MANIFEST);
        if manifest_path.is_file() {
            return match read_manifest(&manifest_path).and_then(|m| m.kind) {
                Some(kind) if kind == "module" => ModuleForm::Esm,
                _ => ModuleForm::Classic,
            };
        }
    }
    ModuleForm::Classic
}
