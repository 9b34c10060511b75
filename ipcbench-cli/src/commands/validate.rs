// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ipcbench validate` command - Validate configuration file.

use std::path::Path;

use ipcbench_core::{BackendRegistry, ConfigLoader, RunMatrix};

pub fn execute(file: &Path) -> anyhow::Result<()> {
    tracing::info!(file = %file.display(), "Validating configuration");

    let config = ConfigLoader::load_file(file)?;
    let matrix = RunMatrix::resolve(
        &BackendRegistry::with_defaults(),
        &config.matrix.backends,
        &config.matrix.scenarios,
        &config.matrix.data_sizes,
        config.matrix.iterations,
    )?;

    println!("✓ Configuration is valid");
    println!();
    println!("Run Settings:");
    println!("  Output Directory:   {}", config.output_dir.display());
    println!("  Resource Prefix:    {}", config.resource_prefix);
    println!("  Resource Directory: {}", config.backends.resource_dir.display());
    println!("  Verify Reads:       {}", config.verify_reads);
    match config.coordination.barrier_timeout {
        Some(timeout) => println!("  Barrier Timeout:    {}ms", timeout.as_millis()),
        None => println!("  Barrier Timeout:    none"),
    }
    println!(
        "  Read Retry:         {} attempts, {}us..{}ms backoff",
        config.retry.max_attempts,
        config.retry.initial_backoff.as_micros(),
        config.retry.max_backoff.as_millis()
    );
    println!();
    println!("Matrix ({} cells):", matrix.len());
    println!("  Backends:   {}", config.matrix.backends.join(", "));
    let scenarios: Vec<&str> = config.matrix.scenarios.iter().map(|s| s.name()).collect();
    println!("  Scenarios:  {}", scenarios.join(", "));
    let sizes: Vec<String> = config.matrix.data_sizes.iter().map(|s| s.to_string()).collect();
    println!("  Data Sizes: {}", sizes.join(", "));
    println!("  Iterations: {}", config.matrix.iterations);
    Ok(())
}
