// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ipcbench CLI
//!
//! Command-line interface for running IPC benchmark process groups.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// ipcbench - Multi-process benchmark of shared-storage and message-passing IPC
#[derive(Parser)]
#[command(name = "ipcbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Run-matrix selection; every flag overrides the config file's `matrix` section.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Scenario to run: shared, streaming or both
    #[arg(long)]
    pub scenario: Option<String>,

    /// Backend name or `all` (repeatable, comma-separated)
    #[arg(long = "backend", value_delimiter = ',')]
    pub backends: Vec<String>,

    /// Entries per dataset (repeatable, comma-separated)
    #[arg(long = "data-size", value_delimiter = ',')]
    pub data_sizes: Vec<usize>,

    /// Reads per reader (shared) or messages per writer (streaming)
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Output directory for the report
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as one member of a process group (membership from IPCBENCH_* variables)
    Run(RunArgs),

    /// Spawn a process group running `ipcbench run` and wait for it
    Launch {
        /// Number of processes: one writer, the rest readers
        #[arg(short = 'n', long, default_value_t = 4)]
        processes: usize,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// List registered backends and their delivery models
    Backends,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Dispatch to command handlers
    let config = cli.config.as_deref();
    let result = match &cli.command {
        Commands::Run(args) => commands::run::execute(config, args),
        Commands::Launch { processes, run } => {
            commands::launch::execute(config, *processes, run, cli.verbose)
        }
        Commands::Validate { file } => commands::validate::execute(file),
        Commands::Backends => commands::backends::execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "ipcbench failed");
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
