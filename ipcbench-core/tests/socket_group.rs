// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run matrix over the Unix-socket communicator, one thread per rank.

use std::path::Path;
use std::time::Duration;

use ipcbench_core::coord::GroupEnv;
use ipcbench_core::{
    BackendRegistry, ConfigLoader, Driver, RunContext, RunMatrix, ScenarioKind, SocketGroup,
};
use tempfile::TempDir;

fn env(dir: &Path, rank: usize, size: usize) -> GroupEnv {
    GroupEnv {
        rank,
        size,
        coordinator: dir.join("coordinator.sock"),
        run_id: "socket-group-test".to_string(),
    }
}

#[test]
fn test_matrix_over_socket_group() {
    let dir = TempDir::new().unwrap();
    let mut config = ConfigLoader::defaults().unwrap();
    config.resource_prefix = format!("sg{}", std::process::id());
    config.backends.resource_dir = dir.path().join("resources");
    config.backends.shm_slot_bytes = 4 * 1024 * 1024;
    config.backends.shm_log_bytes = 8 * 1024 * 1024;
    config.backends.recv_timeout = Duration::from_secs(10);
    config.coordination.barrier_timeout = Some(Duration::from_secs(60));
    config.coordination.connect_timeout = Duration::from_secs(10);

    let registry = BackendRegistry::with_defaults();
    let matrix = RunMatrix::resolve(
        &registry,
        &["all".to_string()],
        &ScenarioKind::ALL,
        &[10, 200],
        5,
    )
    .unwrap();

    let reports = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..3)
            .map(|rank| {
                let (config, registry, matrix) = (&config, &registry, &matrix);
                let env = env(dir.path(), rank, 3);
                scope.spawn(move || {
                    let group = SocketGroup::join(&env, &config.coordination).unwrap();
                    let ctx = RunContext::new(&group, config).unwrap();
                    Driver::new(&ctx, registry).run_matrix(matrix).unwrap()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    let report = reports[0].as_ref().unwrap();
    assert!(reports[1].is_none() && reports[2].is_none());
    assert_eq!(report.len(), matrix.len());
    assert_eq!(report.failed(), 0);

    for (result, cell) in report.results().iter().zip(matrix.cells()) {
        assert_eq!(result.backend, cell.backend());
        assert_eq!(result.scenario, cell.scenario());
        assert_eq!(result.data_size, cell.data_size());
        assert_eq!(result.read_count, 10);
    }
}
