// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Result aggregation on the root process.
//!
//! Rank 0 turns the gathered [`ProcessMetrics`] of a cell into one
//! [`ScenarioResult`] and appends it to the [`BenchmarkReport`].

use serde::{Deserialize, Serialize};

use crate::backend::Delivery;
use crate::error::FailureKind;
use crate::metrics::{Operation, ProcessMetrics};
use crate::types::{BenchmarkCell, Role, ScenarioKind};

/// Outcome of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    Ok,
    Failed,
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellStatus::Ok => write!(f, "Ok"),
            CellStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Read latency distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Minimum observed latency in nanoseconds
    pub min_ns: u64,
    /// Maximum observed latency in nanoseconds
    pub max_ns: u64,
    /// Arithmetic mean latency in nanoseconds
    pub mean_ns: f64,
    /// Median (p50) latency in nanoseconds
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    /// Standard deviation in nanoseconds
    pub std_dev_ns: f64,
}

impl LatencySummary {
    /// Summarize latency samples (in nanoseconds). `None` for no samples.
    pub fn from_samples(mut samples: Vec<u64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        samples.sort_unstable();
        let len = samples.len();
        let percentile = |p: f64| samples[((len as f64 * p) as usize).min(len - 1)];

        let sum: u128 = samples.iter().map(|&x| x as u128).sum();
        let mean_ns = sum as f64 / len as f64;

        let variance: f64 = samples
            .iter()
            .map(|&x| {
                let diff = x as f64 - mean_ns;
                diff * diff
            })
            .sum::<f64>()
            / len as f64;

        Some(Self {
            min_ns: samples[0],
            max_ns: samples[len - 1],
            mean_ns,
            p50_ns: percentile(0.50),
            p95_ns: percentile(0.95),
            p99_ns: percentile(0.99),
            std_dev_ns: variance.sqrt(),
        })
    }

    /// Format latency in human-readable form (auto-selects ns/μs/ms).
    pub fn format_latency(ns: u64) -> String {
        if ns < 1_000 {
            format!("{}ns", ns)
        } else if ns < 1_000_000 {
            format!("{:.2}μs", ns as f64 / 1_000.0)
        } else if ns < 1_000_000_000 {
            format!("{:.2}ms", ns as f64 / 1_000_000.0)
        } else {
            format!("{:.2}s", ns as f64 / 1_000_000_000.0)
        }
    }
}

/// Aggregated result of one cell, as persisted in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub backend: String,
    pub scenario: ScenarioKind,
    pub data_size: usize,
    pub iterations: u64,
    pub readers: usize,
    pub write_time_seconds: f64,
    pub avg_read_time_seconds: f64,
    pub read_count: u64,
    pub throughput_ops_per_sec: f64,
    pub status: CellStatus,
    pub delivery: Delivery,
    /// Deliverable sends, summed over all processes.
    pub sends: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_latency: Option<LatencySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn is_ok(&self) -> bool {
        self.status == CellStatus::Ok
    }
}

/// Throughput as `read_count / slowest reader's elapsed read time`.
///
/// A reader's elapsed time is the sum of its own Read samples; `0` when no
/// read time was recorded.
pub fn throughput(processes: &[ProcessMetrics]) -> f64 {
    let read_count: usize = processes
        .iter()
        .map(|p| p.durations(Operation::Read).count())
        .sum();

    let slowest_ns = processes
        .iter()
        .filter(|p| p.role == Role::Reader)
        .map(|p| p.durations(Operation::Read).map(u128::from).sum::<u128>())
        .max()
        .unwrap_or(0);

    if slowest_ns == 0 {
        return 0.0;
    }
    read_count as f64 / (slowest_ns as f64 / 1e9)
}

/// Build the result of `cell` from every process's metrics (rank order).
pub fn aggregate(
    cell: &BenchmarkCell,
    delivery: Delivery,
    processes: &[ProcessMetrics],
) -> ScenarioResult {
    let readers = processes.iter().filter(|p| p.role == Role::Reader).count();

    let write_ns: u128 = processes
        .iter()
        .filter(|p| p.role == Role::Writer)
        .flat_map(|p| p.durations(Operation::Write))
        .map(u128::from)
        .sum();

    let reads: Vec<u64> = processes
        .iter()
        .flat_map(|p| p.durations(Operation::Read))
        .collect();
    let read_count = reads.len() as u64;
    let avg_read_time_seconds = if reads.is_empty() {
        0.0
    } else {
        reads.iter().map(|&d| d as f64).sum::<f64>() / reads.len() as f64 / 1e9
    };

    let mut status = CellStatus::Ok;
    let mut failure = None;
    let mut error = None;

    if let Some((rank, err)) = processes
        .iter()
        .find_map(|p| p.error.as_ref().map(|e| (p.rank, e)))
    {
        status = CellStatus::Failed;
        failure = Some(err.kind);
        error = Some(format!("rank {}: {}", rank, err.message));
    } else {
        let expected = cell.iterations() * readers as u64;
        if read_count != expected {
            status = CellStatus::Failed;
            failure = Some(FailureKind::BackendIoError);
            error = Some(format!("expected {} reads, gathered {}", expected, read_count));
        }
    }

    ScenarioResult {
        backend: cell.backend().to_string(),
        scenario: cell.scenario(),
        data_size: cell.data_size(),
        iterations: cell.iterations(),
        readers,
        write_time_seconds: write_ns as f64 / 1e9,
        avg_read_time_seconds,
        read_count,
        throughput_ops_per_sec: throughput(processes),
        status,
        delivery,
        sends: processes.iter().map(|p| p.sends).sum(),
        read_latency: LatencySummary::from_samples(reads),
        failure,
        error,
    }
}

/// Ordered, append-only sequence of cell results in run-matrix order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    results: Vec<ScenarioResult>,
}

impl BenchmarkReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.is_ok()).count()
    }

    pub fn into_results(self) -> Vec<ScenarioResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FanOut;
    use crate::metrics::{ProcessError, TimingSample};
    use std::time::Duration;

    fn sample(op: Operation, ns: u64) -> TimingSample {
        TimingSample::new(op, Duration::from_nanos(ns))
    }

    fn process(rank: usize, samples: Vec<TimingSample>) -> ProcessMetrics {
        ProcessMetrics {
            rank,
            role: Role::for_rank(rank),
            samples,
            sends: 0,
            error: None,
        }
    }

    #[test]
    fn test_latency_summary() {
        assert!(LatencySummary::from_samples(vec![]).is_none());

        let summary = LatencySummary::from_samples((1..=100).collect()).unwrap();
        assert_eq!(summary.min_ns, 1);
        assert_eq!(summary.max_ns, 100);
        assert!((summary.mean_ns - 50.5).abs() < 1e-9);
        assert_eq!(summary.p50_ns, 51);
        assert_eq!(summary.p99_ns, 100);

        let single = LatencySummary::from_samples(vec![7]).unwrap();
        assert_eq!(single.p99_ns, 7);
        assert_eq!(single.std_dev_ns, 0.0);
    }

    #[test]
    fn test_aggregate_shared_cell() {
        let cell = BenchmarkCell::new("shm", ScenarioKind::Shared, 10, 2).unwrap();
        let parts = vec![
            process(0, vec![sample(Operation::Write, 4_000)]),
            process(1, vec![sample(Operation::Read, 1_000), sample(Operation::Read, 1_000)]),
            process(2, vec![sample(Operation::Read, 3_000), sample(Operation::Read, 1_000)]),
        ];

        let result = aggregate(&cell, Delivery::SharedStorage, &parts);
        assert_eq!(result.status, CellStatus::Ok);
        assert_eq!(result.read_count, 4);
        assert_eq!(result.readers, 2);
        assert!((result.write_time_seconds - 4e-6).abs() < 1e-15);
        assert!((result.avg_read_time_seconds - 1.5e-6).abs() < 1e-15);
        // slowest reader spent 4µs reading; 4 reads / 4µs
        assert!((result.throughput_ops_per_sec - 1_000_000.0).abs() < 1e-6);
        assert_eq!(result.read_latency.as_ref().unwrap().max_ns, 3_000);
    }

    #[test]
    fn test_streaming_write_time_is_summed() {
        let cell = BenchmarkCell::new("socket", ScenarioKind::Streaming, 10, 3).unwrap();
        let mut writer = process(
            0,
            vec![
                sample(Operation::Write, 1_000),
                sample(Operation::Write, 2_000),
                sample(Operation::Write, 3_000),
            ],
        );
        writer.sends = 3;
        let reader = process(1, (0..3).map(|_| sample(Operation::Read, 500)).collect());

        let delivery = Delivery::MessagePassing(FanOut::PointToPoint);
        let result = aggregate(&cell, delivery, &[writer, reader]);
        assert!((result.write_time_seconds - 6e-6).abs() < 1e-15);
        assert_eq!(result.sends, 3);
        assert_eq!(result.delivery.name(), "point-to-point");
    }

    #[test]
    fn test_first_error_fails_the_cell() {
        let cell = BenchmarkCell::new("file", ScenarioKind::Shared, 10, 1).unwrap();
        let mut reader = process(1, vec![]);
        reader.error = Some(ProcessError {
            kind: FailureKind::BackendReadNotReady,
            message: "Read still not ready after 20 attempts".to_string(),
        });

        let result = aggregate(
            &cell,
            Delivery::SharedStorage,
            &[process(0, vec![sample(Operation::Write, 10)]), reader],
        );
        assert_eq!(result.status, CellStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::BackendReadNotReady));
        assert!(result.error.unwrap().starts_with("rank 1:"));
    }

    #[test]
    fn test_missing_reads_fail_the_cell() {
        let cell = BenchmarkCell::new("shm", ScenarioKind::Shared, 10, 2).unwrap();
        let parts = vec![
            process(0, vec![sample(Operation::Write, 10)]),
            process(1, vec![sample(Operation::Read, 10)]),
        ];
        let result = aggregate(&cell, Delivery::SharedStorage, &parts);
        assert_eq!(result.status, CellStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::BackendIoError));
    }

    #[test]
    fn test_zero_iterations() {
        let cell = BenchmarkCell::new("shm", ScenarioKind::Streaming, 10, 0).unwrap();
        let processes = [process(0, vec![]), process(1, vec![])];
        let result = aggregate(&cell, Delivery::SharedStorage, &processes);
        assert!(result.is_ok());
        assert_eq!(result.read_count, 0);
        assert_eq!(result.throughput_ops_per_sec, 0.0);
        assert!(result.read_latency.is_none());
    }

    #[test]
    fn test_report_is_ordered() {
        let mut report = BenchmarkReport::new();
        for size in [1usize, 10, 100] {
            let cell = BenchmarkCell::new("shm", ScenarioKind::Shared, size, 0).unwrap();
            let processes = [process(0, vec![]), process(1, vec![])];
            report.push(aggregate(&cell, Delivery::SharedStorage, &processes));
        }
        let sizes: Vec<_> = report.results().iter().map(|r| r.data_size).collect();
        assert_eq!(sizes, vec![1, 10, 100]);
        assert_eq!(report.failed(), 0);
    }
}
