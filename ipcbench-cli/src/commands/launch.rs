// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ipcbench launch` command - Spawn and supervise a process group.
//!
//! Every member is this executable running `ipcbench run` with its rank, the
//! group size, the coordinator socket and the run id in `IPCBENCH_*` variables.
//! When one member fails or Ctrl+C arrives, the remaining members get SIGTERM.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use ipcbench_core::coord::{ENV_COORDINATOR, ENV_RANK, ENV_RUN_ID, ENV_SIZE};
use ipcbench_core::{BackendRegistry, ConfigurationError};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::run;
use crate::RunArgs;

pub fn execute(
    config_path: Option<&Path>,
    processes: usize,
    args: &RunArgs,
    verbose: bool,
) -> anyhow::Result<()> {
    if processes < 2 {
        return Err(ConfigurationError::InsufficientProcesses { size: processes }.into());
    }

    // Fail fast on invalid config before anything is spawned
    let mut config = run::load_config(config_path)?;
    run::apply_overrides(&mut config, args)?;
    let matrix = run::build_matrix(&BackendRegistry::with_defaults(), &config)?;

    let run_id = Uuid::new_v4().to_string();
    let coordinator = coordinator_path(&run_id);
    let _ = std::fs::remove_file(&coordinator);

    let group = Group {
        exe: std::env::current_exe().context("cannot locate the ipcbench executable")?,
        args: worker_args(config_path, verbose, args),
        size: processes,
        run_id,
        coordinator,
    };

    println!("▶ Launching {} processes ({} readers)", processes, processes - 1);
    println!("  Run ID:  {}", group.run_id);
    println!("  Cells:   {}", matrix.len());
    println!();
    tracing::info!(
        processes,
        run_id = %group.run_id,
        coordinator = %group.coordinator.display(),
        "Launching process group"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(group.supervise());

    let _ = std::fs::remove_file(&group.coordinator);
    result
}

struct Group {
    exe: PathBuf,
    args: Vec<OsString>,
    size: usize,
    run_id: String,
    coordinator: PathBuf,
}

impl Group {
    async fn supervise(&self) -> anyhow::Result<()> {
        let mut pids: Vec<Option<u32>> = Vec::with_capacity(self.size);
        let mut workers = JoinSet::new();

        for rank in 0..self.size {
            let mut child = Command::new(&self.exe)
                .args(&self.args)
                .env(ENV_RANK, rank.to_string())
                .env(ENV_SIZE, self.size.to_string())
                .env(ENV_COORDINATOR, &self.coordinator)
                .env(ENV_RUN_ID, &self.run_id)
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to spawn rank {}", rank))?;

            let pid = child.id();
            tracing::debug!(rank, pid = ?pid, "Spawned member");
            pids.push(pid);
            workers.spawn(async move { (rank, child.wait().await) });
        }

        let mut failures: Vec<String> = Vec::new();
        let mut interrupted = false;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                joined = workers.join_next() => {
                    let Some(joined) = joined else { break };
                    let (rank, status) = joined.context("member supervisor task failed")?;
                    pids[rank] = None;

                    let failure = match status {
                        Ok(status) if status.success() => {
                            tracing::debug!(rank, "Member finished");
                            continue;
                        }
                        Ok(status) => format!("rank {} exited with {}", rank, status),
                        Err(e) => format!("rank {} could not be awaited: {}", rank, e),
                    };

                    tracing::error!(rank, failure = %failure, "Member failed");
                    if failures.is_empty() && !interrupted {
                        terminate(&pids);
                    }
                    failures.push(failure);
                }
                signal = &mut ctrl_c, if !interrupted => {
                    signal.context("failed to listen for Ctrl+C")?;
                    interrupted = true;
                    println!();
                    println!("Interrupted, stopping process group...");
                    tracing::warn!("Interrupted, stopping process group");
                    terminate(&pids);
                }
            }
        }

        if interrupted {
            bail!("run {} interrupted", self.run_id);
        }
        if !failures.is_empty() {
            bail!(
                "{} of {} processes failed: {}",
                failures.len(),
                self.size,
                failures.join("; ")
            );
        }

        println!();
        println!("✓ Process group finished");
        Ok(())
    }
}

/// Send SIGTERM to every member still running.
fn terminate(pids: &[Option<u32>]) {
    for (rank, pid) in pids.iter().enumerate() {
        let Some(raw) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
            continue;
        };
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => tracing::debug!(rank, pid = raw, "Sent SIGTERM"),
            Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(rank, pid = raw, error = %e, "Failed to signal member"),
        }
    }
}

fn coordinator_path(run_id: &str) -> PathBuf {
    let short: String = run_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
    std::env::temp_dir().join(format!("ipcbench-{}.sock", short))
}

/// Command line of one member: global flags, then `run` with the matrix flags.
fn worker_args(config_path: Option<&Path>, verbose: bool, args: &RunArgs) -> Vec<OsString> {
    let mut out: Vec<OsString> = Vec::new();

    if let Some(path) = config_path {
        out.push("--config".into());
        out.push(path.into());
    }
    if verbose {
        out.push("--verbose".into());
    }

    out.push("run".into());
    if let Some(scenario) = &args.scenario {
        out.push("--scenario".into());
        out.push(scenario.into());
    }
    for backend in &args.backends {
        out.push("--backend".into());
        out.push(backend.into());
    }
    for size in &args.data_sizes {
        out.push("--data-size".into());
        out.push(size.to_string().into());
    }
    if let Some(iterations) = args.iterations {
        out.push("--iterations".into());
        out.push(iterations.to_string().into());
    }
    if let Some(output) = &args.output {
        out.push("--output".into());
        out.push(output.into());
    }
    out
}
