// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Persisted report document.
//!
//! Wraps the ordered cell results of a run with the metadata needed to match
//! a report file against a specific run and machine.

use chrono::{DateTime, Utc};
use ipcbench_core::{BenchmarkReport, CellStatus, ScenarioResult};
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Suite identifier written into every report.
pub const SUITE_NAME: &str = "ipcbench";

/// System information captured at benchmark time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Operating system name
    pub os: String,
    /// OS version
    pub os_version: String,
    /// Kernel version (Linux)
    pub kernel_version: Option<String>,
    /// CPU model name
    pub cpu_model: String,
    /// Number of CPU cores
    pub cpu_cores: usize,
    /// Total system memory in bytes
    pub memory_bytes: u64,
    /// Hostname
    pub hostname: String,
}

impl SystemInfo {
    /// Collect current system information.
    pub fn collect() -> Self {
        let sys = System::new_all();

        Self {
            os: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Complete report of one run, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    /// Suite identifier
    pub benchmark_suite: String,
    /// Framework version
    pub version: String,
    /// Timestamp when the run finished
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// Size of the process group (one writer, the rest readers)
    pub processes: usize,
    pub system_info: SystemInfo,
    /// Cell results in run-matrix order
    pub results: Vec<ScenarioResult>,
}

impl ReportDocument {
    pub fn new(run_id: impl Into<String>, processes: usize, report: BenchmarkReport) -> Self {
        Self {
            benchmark_suite: SUITE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            run_id: run_id.into(),
            processes,
            system_info: SystemInfo::collect(),
            results: report.into_results(),
        }
    }

    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == CellStatus::Failed)
            .count()
    }
}

/// Format an operation rate in human-readable form.
pub fn format_rate(ops_per_sec: f64) -> String {
    if ops_per_sec < 1_000.0 {
        format!("{:.2} ops/s", ops_per_sec)
    } else if ops_per_sec < 1_000_000.0 {
        format!("{:.2} Kops/s", ops_per_sec / 1_000.0)
    } else {
        format!("{:.2} Mops/s", ops_per_sec / 1_000_000.0)
    }
}

/// Format a duration given in seconds (auto-selects ns/μs/ms/s).
pub fn format_seconds(seconds: f64) -> String {
    ipcbench_core::LatencySummary::format_latency((seconds * 1e9).round() as u64)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ipcbench_core::{Delivery, FailureKind, LatencySummary, ScenarioKind};

    pub(crate) fn result(
        backend: &str,
        scenario: ScenarioKind,
        status: CellStatus,
    ) -> ScenarioResult {
        let ok = status == CellStatus::Ok;
        ScenarioResult {
            backend: backend.to_string(),
            scenario,
            data_size: 100,
            iterations: 10,
            readers: 3,
            write_time_seconds: 0.000_25,
            avg_read_time_seconds: 0.000_012,
            read_count: if ok { 30 } else { 0 },
            throughput_ops_per_sec: if ok { 83_333.3 } else { 0.0 },
            status,
            delivery: Delivery::SharedStorage,
            sends: 1,
            read_latency: if ok {
                LatencySummary::from_samples(vec![10_000, 12_000, 14_000])
            } else {
                None
            },
            failure: (!ok).then_some(FailureKind::BackendIoError),
            error: (!ok).then(|| "rank 0: injected".to_string()),
        }
    }

    #[test]
    fn test_system_info_collect() {
        let info = SystemInfo::collect();
        assert!(!info.os.is_empty());
        assert!(info.cpu_cores > 0);
        assert!(info.memory_bytes > 0);
    }

    #[test]
    fn test_document_serialization() {
        let mut report = BenchmarkReport::new();
        report.push(result("shm", ScenarioKind::Shared, CellStatus::Ok));
        report.push(result("file", ScenarioKind::Streaming, CellStatus::Failed));

        let doc = ReportDocument::new("run-1", 4, report);
        assert_eq!(doc.failed(), 1);

        let json = serde_json::to_string_pretty(&doc).unwrap();
        assert!(json.contains("\"benchmark_suite\": \"ipcbench\""));
        assert!(json.contains("\"throughput_ops_per_sec\""));
        assert!(json.contains("\"delivery\": \"shared-storage\""));
        assert!(json.contains("\"failure\": \"BackendIOError\""));

        let back: ReportDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_rate(512.0), "512.00 ops/s");
        assert_eq!(format_rate(83_333.3), "83.33 Kops/s");
        assert_eq!(format_rate(2_500_000.0), "2.50 Mops/s");
        assert_eq!(format_seconds(0.000_012), "12.00μs");
    }
}
