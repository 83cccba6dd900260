//! jsembed CLI
//!
//! Runs a single script file on the embedded engine, prepares the module
//! root, and prints the effective configuration.

use jsembed_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
