// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Single-process backend micro-benchmarks.
//!
//! Writer and reader endpoints live in the benchmark process, so these numbers
//! isolate the cost of each mechanism from cross-process scheduling:
//! - Dataset envelope seal/open
//! - Write + Read round-trip per registered backend

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ipcbench_core::backend::Backend;
use ipcbench_core::config::BackendSettings;
use ipcbench_core::{BackendRegistry, BenchmarkCell, Dataset, Endpoint, ScenarioKind};
use std::time::Duration;
use tempfile::TempDir;

/// Dataset sizes (entries per dataset).
const DATA_SIZES: &[usize] = &[10, 1000, 10000];

fn settings(dir: &TempDir) -> BackendSettings {
    BackendSettings {
        resource_dir: dir.path().to_path_buf(),
        shm_slot_bytes: 16 * 1024 * 1024,
        shm_log_bytes: 64 * 1024 * 1024,
        recv_timeout: Duration::from_secs(10),
    }
}

/// Benchmark envelope encoding and decoding of datasets.
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for &size in DATA_SIZES {
        let dataset = Dataset::generate(7, size);
        let sealed = dataset.seal().expect("Failed to seal dataset");
        group.throughput(Throughput::Bytes(sealed.len() as u64));

        group.bench_with_input(BenchmarkId::new("seal", size), &dataset, |b, dataset| {
            b.iter(|| black_box(dataset.seal().expect("Seal failed")));
        });

        group.bench_with_input(BenchmarkId::new("open", size), &sealed, |b, sealed| {
            b.iter(|| black_box(Dataset::open(black_box(sealed)).expect("Open failed")));
        });
    }

    group.finish();
}

/// Benchmark Write followed by Read on every registered backend.
fn bench_backend_roundtrip(c: &mut Criterion) {
    let registry = BackendRegistry::with_defaults();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let settings = settings(&temp_dir);

    for name in registry.names() {
        let mut group = c.benchmark_group(format!("roundtrip_{}", name));
        group.measurement_time(Duration::from_secs(5));

        for &size in DATA_SIZES {
            let cell = BenchmarkCell::new(name, ScenarioKind::Streaming, size, 1)
                .expect("Invalid cell");
            let identity = cell
                .identity(&format!("bench{}", std::process::id()))
                .expect("Invalid identity");
            let dataset = Dataset::for_cell(&cell);
            group.throughput(Throughput::Elements(size as u64));

            let mut writer = registry.create(name, &settings).expect("Unknown backend");
            let mut reader = registry.create(name, &settings).expect("Unknown backend");
            writer
                .initialize(&Endpoint::for_cell(&cell, identity.clone(), 0, 2))
                .expect("Writer initialize failed");
            reader
                .initialize(&Endpoint::for_cell(&cell, identity, 1, 2))
                .expect("Reader initialize failed");

            group.bench_with_input(BenchmarkId::from_parameter(size), &dataset, |b, dataset| {
                b.iter(|| {
                    writer.write(black_box(dataset)).expect("Write failed");
                    black_box(reader.read().expect("Read failed"));
                });
            });

            reader.cleanup().expect("Reader cleanup failed");
            writer.cleanup().expect("Writer cleanup failed");
        }

        group.finish();
    }
}

criterion_group!(benches, bench_envelope, bench_backend_roundtrip);

criterion_main!(benches);
