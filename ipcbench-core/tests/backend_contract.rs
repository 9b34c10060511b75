// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Contract tests every registered backend must pass.
//!
//! Writer and reader endpoints live in the same process here; the backends
//! cannot tell the difference.

use std::time::Duration;

use ipcbench_core::backend::Backend;
use ipcbench_core::config::BackendSettings;
use ipcbench_core::{BackendError, BackendRegistry, BenchmarkCell, Dataset, Endpoint, ScenarioKind};
use tempfile::TempDir;

fn settings(dir: &TempDir) -> BackendSettings {
    BackendSettings {
        resource_dir: dir.path().to_path_buf(),
        shm_slot_bytes: 8 * 1024 * 1024,
        shm_log_bytes: 16 * 1024 * 1024,
        recv_timeout: Duration::from_secs(5),
    }
}

/// Writer plus one reader bound to the identity of `cell`.
struct Pair {
    writer: Box<dyn Backend>,
    reader: Box<dyn Backend>,
}

impl Pair {
    fn bind(
        registry: &BackendRegistry,
        settings: &BackendSettings,
        name: &str,
        cell: &BenchmarkCell,
        prefix: &str,
    ) -> Self {
        let identity = cell.identity(prefix).unwrap();
        let mut writer = registry.create(name, settings).unwrap();
        let mut reader = registry.create(name, settings).unwrap();

        writer
            .initialize(&Endpoint::for_cell(cell, identity.clone(), 0, 2))
            .unwrap_or_else(|e| panic!("{} writer: {}", name, e));
        reader
            .initialize(&Endpoint::for_cell(cell, identity, 1, 2))
            .unwrap_or_else(|e| panic!("{} reader: {}", name, e));

        Self { writer, reader }
    }

    fn release(mut self) {
        self.reader.cleanup().unwrap();
        self.writer.cleanup().unwrap();
        // idempotent
        self.reader.cleanup().unwrap();
        self.writer.cleanup().unwrap();
    }
}

fn prefix(test: &str) -> String {
    format!("bc{}_{}", std::process::id(), test)
}

#[test]
fn test_round_trip_every_backend() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();

    for name in registry.names() {
        for size in [1usize, 10, 1000, 10000] {
            let cell = BenchmarkCell::new(name, ScenarioKind::Streaming, size, 1).unwrap();
            let pair = Pair::bind(&registry, &settings, name, &cell, &prefix("rt"));
            let Pair { mut writer, mut reader } = pair;

            let dataset = Dataset::for_cell(&cell);
            writer.write(&dataset).unwrap();
            let read = reader.read().unwrap();

            assert_eq!(read, dataset, "{} with {} entries", name, size);
            assert_eq!(read.len(), size);
            assert_eq!(writer.sends(), 1);

            Pair { writer, reader }.release();
        }
    }
}

#[test]
fn test_shared_storage_reports_not_ready_before_first_write() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();

    for name in ["shm", "file"] {
        let cell = BenchmarkCell::new(name, ScenarioKind::Shared, 10, 3).unwrap();
        let mut pair = Pair::bind(&registry, &settings, name, &cell, &prefix("nr"));

        assert!(pair.writer.delivery().is_shared_storage());
        assert!(matches!(pair.reader.read(), Err(BackendError::NotReady)), "{}", name);

        let dataset = Dataset::for_cell(&cell);
        pair.writer.write(&dataset).unwrap();
        // published data can be read any number of times
        for _ in 0..3 {
            assert_eq!(pair.reader.read().unwrap(), dataset);
        }
        pair.release();
    }
}

#[test]
fn test_shared_delivery_copies_for_message_passing() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();

    for name in ["socket", "shm-log"] {
        let cell = BenchmarkCell::new(name, ScenarioKind::Shared, 25, 4).unwrap();
        let mut pair = Pair::bind(&registry, &settings, name, &cell, &prefix("copies"));
        assert!(!pair.writer.delivery().is_shared_storage());

        let dataset = Dataset::for_cell(&cell);
        pair.writer.write(&dataset).unwrap();
        for read in 0..4 {
            assert_eq!(pair.reader.read().unwrap(), dataset, "{} read {}", name, read);
        }
        assert_eq!(pair.writer.sends(), 4, "{}", name);
        pair.release();
    }
}

#[test]
fn test_streaming_preserves_issue_order() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();

    for name in ["socket", "shm-log"] {
        let cell = BenchmarkCell::new(name, ScenarioKind::Streaming, 5, 6).unwrap();
        let mut pair = Pair::bind(&registry, &settings, name, &cell, &prefix("order"));

        for i in 0..6 {
            pair.writer.write(&Dataset::for_iteration(&cell, i)).unwrap();
        }
        for i in 0..6 {
            assert_eq!(pair.reader.read().unwrap(), Dataset::for_iteration(&cell, i), "{}", name);
        }
        pair.release();
    }
}

#[test]
fn test_reused_identity_never_returns_prior_data() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();
    let prefix = prefix("reuse");

    for name in registry.names() {
        let first = BenchmarkCell::new(name, ScenarioKind::Streaming, 20, 1).unwrap();
        let mut pair = Pair::bind(&registry, &settings, name, &first, &prefix);
        pair.writer.write(&Dataset::for_cell(&first)).unwrap();
        assert_eq!(pair.reader.read().unwrap(), Dataset::for_cell(&first));
        pair.release();

        // same identity: the data size is unchanged
        let second = BenchmarkCell::new(name, ScenarioKind::Shared, 20, 1).unwrap();
        assert_eq!(first.identity(&prefix).unwrap(), second.identity(&prefix).unwrap());
        let mut pair = Pair::bind(&registry, &settings, name, &second, &prefix);

        if pair.writer.delivery().is_shared_storage() {
            assert!(matches!(pair.reader.read(), Err(BackendError::NotReady)), "{}", name);
        }
        pair.writer.write(&Dataset::for_cell(&second)).unwrap();
        let read = pair.reader.read().unwrap();
        assert_eq!(read, Dataset::for_cell(&second), "{}", name);
        assert_ne!(read, Dataset::for_cell(&first));
        pair.release();
    }
}

#[test]
fn test_live_identity_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();

    for name in registry.names() {
        let cell = BenchmarkCell::new(name, ScenarioKind::Shared, 10, 1).unwrap();
        let prefix = prefix("conflict");
        let owner = Pair::bind(&registry, &settings, name, &cell, &prefix);

        let mut intruder = registry.create(name, &settings).unwrap();
        let identity = cell.identity(&prefix).unwrap();
        let result = intruder.initialize(&Endpoint::for_cell(&cell, identity, 0, 2));
        assert!(
            matches!(result, Err(BackendError::ResourceConflict { .. })),
            "{}: {:?}",
            name,
            result
        );

        // nothing to release after a failed initialize; the owner keeps its resource
        intruder.cleanup().unwrap();
        owner.release();
    }
}

#[test]
fn test_role_violations() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let registry = BackendRegistry::with_defaults();

    for name in registry.names() {
        let cell = BenchmarkCell::new(name, ScenarioKind::Streaming, 3, 1).unwrap();
        let mut pair = Pair::bind(&registry, &settings, name, &cell, &prefix("roles"));

        assert!(matches!(
            pair.reader.write(&Dataset::for_cell(&cell)),
            Err(BackendError::RoleViolation { .. })
        ));
        assert!(matches!(pair.writer.read(), Err(BackendError::RoleViolation { .. })));
        pair.release();
    }
}
