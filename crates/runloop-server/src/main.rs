// runloop-server/src/main.rs
// ============================================================================
// Module: Runloop Server Binary
// Description: Command-line entry for the Runloop server.
// Purpose: Load configuration, build the container, and serve.
// Dependencies: clap, runloop-server, tokio
// ============================================================================

//! ## Overview
//! The binary parses a config path, builds the container once, and serves
//! until the process is terminated. Startup failures print a single
//! diagnostic line and exit non-zero.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use runloop_server::RunloopConfig;
use runloop_server::ServerState;

// ============================================================================
// SECTION: CLI
// ============================================================================

/// Runloop workflow execution server.
#[derive(Debug, Parser)]
#[command(name = "runloop-server", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Entry
// ============================================================================

#[tokio::main]
#[allow(clippy::print_stderr, reason = "Startup diagnostics go to stderr by contract.")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => match RunloopConfig::load(&path) {
            Ok(config) => config,
            Err(error) => {
                eprintln!("runloop-server: {error}");
                return ExitCode::FAILURE;
            }
        },
        None => RunloopConfig::default(),
    };

    let state = match ServerState::from_config(config) {
        Ok(state) => state,
        Err(error) => {
            eprintln!("runloop-server: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runloop_server::serve(state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("runloop-server: {error}");
            ExitCode::FAILURE
        }
    }
}
