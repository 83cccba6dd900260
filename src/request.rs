//! Execution requests

use std::path::{Path, PathBuf};

use crate::error::ExecutionError;
use crate::modules::{classify, ModuleForm};

/// An immutable request to run one script file
///
/// The path is absolute and canonical; the working directory is its parent
/// and the module form is derived from the file itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    path: PathBuf,
    working_dir: PathBuf,
    form: ModuleForm,
}

impl ExecutionRequest {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(ExecutionError::InvalidRequest(format!(
                "script path must be absolute: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(ExecutionError::InvalidRequest(format!(
                "script path is not a file: {}",
                path.display()
            )));
        }

        let path = path.canonicalize()?;
        let working_dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ExecutionError::InvalidRequest(format!("{} has no parent directory", path.display())))?;
        let form = classify(&path);

        Ok(Self {
            path,
            working_dir,
            form,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn form(&self) -> ModuleForm {
        self.form
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_relative_paths_are_rejected() {
        let err = ExecutionRequest::new("app/index.js").unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidRequest(_)));
    }

    #[test]
    fn test_directories_and_missing_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ExecutionRequest::new(dir.path()).is_err());
        assert!(ExecutionRequest::new(dir.path().join("missing.js")).is_err());
    }

    #[test]
    fn test_form_and_working_dir_are_derived() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.mjs");
        fs::write(&script, "export default 1;").unwrap();

        let request = ExecutionRequest::new(&script).unwrap();
        assert_eq!(request.form(), ModuleForm::Esm);
        assert_eq!(request.working_dir(), dir.path().canonicalize().unwrap());
        assert!(request.path().ends_with("main.mjs"));
    }
}
