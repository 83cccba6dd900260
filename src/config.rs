//! Engine configuration
//!
//! Layered through the `config` crate, lowest priority first:
//! built-in defaults, an optional TOML file, `JSEMBED_*` environment
//! variables (after loading `.env`), then explicit builder overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "JSEMBED";
pub const CONFIG_PATH_ENV: &str = "JSEMBED_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "jsembed.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Secondary dependency root searched after the importing file's directory
    pub module_root: PathBuf,
    /// Runtime heap limit, 0 for no limit
    pub memory_limit_bytes: u64,
    /// Native stack limit for script code, 0 for no limit
    pub max_stack_size_bytes: u64,
    /// Allocation threshold that triggers a GC pass, 0 for the runtime default
    pub gc_threshold_bytes: u64,
    /// Maximum runtime jobs run per pump iteration
    pub job_slice: usize,
    pub marshal_max_depth: usize,
    /// Write a default package.json for module root entries that lack one
    pub synthesize_manifests: bool,
    pub capabilities: CapabilitySet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_root: PathBuf::from("node_modules"),
            memory_limit_bytes: 0,
            max_stack_size_bytes: 1024 * 1024,
            gc_threshold_bytes: 0,
            job_slice: 64,
            marshal_max_depth: crate::marshal::DEFAULT_MAX_DEPTH,
            synthesize_manifests: true,
            capabilities: CapabilitySet::default(),
        }
    }
}

/// Which built-in capabilities the engine registers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CapabilitySet {
    pub console: bool,
    pub bridge: bool,
    pub timers: bool,
    pub notification: bool,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            console: true,
            bridge: true,
            timers: true,
            notification: true,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Load with no overrides
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    fn validate(&self) -> Result<()> {
        if self.job_slice == 0 {
            anyhow::bail!("job_slice must be at least 1");
        }
        if self.marshal_max_depth == 0 {
            anyhow::bail!("marshal_max_depth must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config_path: Option<PathBuf>,
    module_root: Option<PathBuf>,
    job_slice: Option<usize>,
    skip_env: bool,
    env_source: Option<HashMap<String, String>>,
}

impl EngineConfigBuilder {
    /// Explicit config file. Falls back to `JSEMBED_CONFIG_PATH`, then an
    /// optional `jsembed.toml` in the working directory.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn module_root(mut self, path: Option<PathBuf>) -> Self {
        self.module_root = path;
        self
    }

    pub fn job_slice(mut self, slice: Option<usize>) -> Self {
        self.job_slice = slice;
        self
    }

    /// Ignore `.env` and `JSEMBED_*` variables
    pub fn without_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Read `JSEMBED_*` variables from `vars` instead of the process
    /// environment. Does not re-enable a layer turned off by `without_env`.
    pub fn env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let process_env = !self.skip_env && self.env_source.is_none();
        if process_env {
            // A missing .env file is normal
            let _ = dotenvy::dotenv();
        }

        let defaults = config::Config::try_from(&EngineConfig::default())
            .context("Failed to build default configuration")?;
        let mut builder = config::Config::builder().add_source(defaults);

        let env_path = if self.skip_env {
            None
        } else if let Some(vars) = &self.env_source {
            vars.get(CONFIG_PATH_ENV).map(PathBuf::from)
        } else {
            std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
        };
        match self.config_path.or(env_path) {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(file_source(&path).required(true));
            }
            None => {
                builder = builder.add_source(file_source(Path::new(DEFAULT_CONFIG_FILE)).required(false));
            }
        }

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(self.env_source),
            );
        }

        if let Some(root) = self.module_root {
            builder = builder.set_override("module_root", root.to_string_lossy().into_owned())?;
        }
        if let Some(slice) = self.job_slice {
            builder = builder.set_override("job_slice", slice as u64)?;
        }

        let config: EngineConfig = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}

fn file_source(path: &Path) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path).format(config::FileFormat::Toml)
}
