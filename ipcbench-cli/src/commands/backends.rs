// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ipcbench backends` command - List registered backends.

use ipcbench_core::config::BackendSettings;
use ipcbench_core::BackendRegistry;

pub fn execute() -> anyhow::Result<()> {
    let registry = BackendRegistry::with_defaults();
    // Construction binds nothing; resources are only touched by initialize.
    let settings = BackendSettings::default();

    println!("{:<12} DELIVERY", "BACKEND");
    println!("{}", "-".repeat(30));
    for name in registry.names() {
        let backend = registry.create(name, &settings)?;
        println!("{:<12} {}", name, backend.delivery());
    }
    println!();
    println!("Total: {} backends", registry.len());
    Ok(())
}
