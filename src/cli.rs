use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::capabilities::{ConsoleLevel, ConsoleSink};
use crate::config::{EngineConfig, CONFIG_PATH_ENV};
use crate::engine::{Engine, EngineOption};
use crate::modules::prepare_module_root;

#[derive(Parser)]
#[command(name = "jsembed")]
#[command(about = "jsembed - run JavaScript files on an embedded engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Dependency root (overrides config file and env vars)
    #[arg(long, global = true)]
    pub module_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a script file and print its completion value
    Run {
        /// Script to run (.js, .mjs or .cjs)
        file: PathBuf,

        /// Runtime jobs per pump iteration
        #[arg(long)]
        job_slice: Option<usize>,

        /// Resolve top-level require() from this directory instead of the script's
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Arguments exposed to the script as `scriptArgs`
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Manage the dependency root
    Modules {
        #[command(subcommand)]
        command: ModulesCommand,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum ModulesCommand {
    /// Create the module root and write missing package manifests
    Prepare,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
}

/// Script console for the CLI: output on stdout, warnings and errors on stderr
struct StdioConsole;

impl ConsoleSink for StdioConsole {
    fn write(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Warn | ConsoleLevel::Error => eprintln!("{}", message),
            _ => println!("{}", message),
        }
    }
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    if let Some(config_path) = &cli.config {
        std::env::set_var(CONFIG_PATH_ENV, config_path);
    }

    let config = EngineConfig::builder()
        .module_root(cli.module_root.clone())
        .build()?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Run {
            file,
            job_slice,
            cwd,
            args,
        } => {
            let file = std::path::absolute(&file)
                .with_context(|| format!("Cannot resolve script path {}", file.display()))?;

            let mut engine = Engine::builder()
                .config(config)
                .console(Arc::new(StdioConsole))
                .build()?;
            engine.init()?;

            engine.configure(EngineOption::ScriptArgs(args));
            if let Some(slice) = job_slice {
                engine.configure(EngineOption::JobSlice(slice));
            }
            if let Some(cwd) = cwd {
                engine.configure(EngineOption::WorkingDirectory(std::path::absolute(cwd)?));
            }

            let handle = engine.handle();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping script");
                    handle.force_stop();
                }
            });

            let result = engine.execute_path(&file).await;
            interrupt.abort();
            engine.destroy();

            match result {
                Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                // Already written to stderr by the engine's console
                Err(_) => std::process::exit(1),
            }
        }

        Commands::Modules {
            command: ModulesCommand::Prepare,
        } => {
            let root = if config.module_root.is_absolute() {
                config.module_root.clone()
            } else {
                std::env::current_dir()?.join(&config.module_root)
            };
            let written = prepare_module_root(&root)?;
            println!("Module root: {}", root.display());
            if written.is_empty() {
                println!("All packages already have a manifest.");
            }
            for manifest in written {
                println!("  wrote {}", manifest.display());
            }
        }

        Commands::Config {
            command: ConfigCommand::Show,
        } => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
