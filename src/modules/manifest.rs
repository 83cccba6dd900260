//! Module root provisioning

use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Create the module root if needed and give every top-level package
/// directory a default `package.json` when it has none.
///
/// Returns the manifests that were written.
pub fn prepare_module_root(root: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(root)
        .with_context(|| format!("Failed to create module root {}", root.display()))?;

    let mut written = Vec::new();
    let entries = fs::read_dir(root)
        .with_context(|| format!("Failed to read module root {}", root.display()))?;
    for entry in entries {
        let entry = entry?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let manifest = dir.join("package.json");
        if manifest.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let body = json!({
            "name": name,
            "version": "0.0.0",
            "main": "index.js",
        });
        let text = serde_json::to_string_pretty(&body)?;
        fs::write(&manifest, text)
            .with_context(|| format!("Failed to write {}", manifest.display()))?;
        debug!(package = %name, "Synthesized package manifest");
        written.push(manifest);
    }

    if !written.is_empty() {
        info!(root = %root.display(), count = written.len(), "Prepared module root");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_synthesizes_missing_manifests_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("node_modules");
        fs::create_dir_all(root.join("bare")).unwrap();
        fs::create_dir_all(root.join("described")).unwrap();
        fs::write(root.join("described/package.json"), r#"{"name":"described","main":"lib.js"}"#).unwrap();
        fs::write(root.join("loose.js"), "").unwrap();

        let written = prepare_module_root(&root).unwrap();
        assert_eq!(written, vec![root.join("bare/package.json")]);

        let manifest: Value = serde_json::from_str(&fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(manifest, json!({"name": "bare", "version": "0.0.0", "main": "index.js"}));

        let kept = fs::read_to_string(root.join("described/package.json")).unwrap();
        assert!(kept.contains("lib.js"));
    }

    #[test]
    fn test_creates_missing_root_and_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("deps");
        assert!(prepare_module_root(&root).unwrap().is_empty());
        assert!(root.is_dir());

        fs::create_dir_all(root.join("pkg")).unwrap();
        assert_eq!(prepare_module_root(&root).unwrap().len(), 1);
        assert!(prepare_module_root(&root).unwrap().is_empty());
    }
}
