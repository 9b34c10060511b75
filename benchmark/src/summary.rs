// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Human-readable summary table, grouped by scenario.

use std::fmt::Write;

use crate::report::{format_rate, format_seconds, ReportDocument};
use ipcbench_core::{CellStatus, LatencySummary, ScenarioKind};

/// Render the summary of `doc`. Scenarios appear in their canonical order;
/// within a scenario rows keep run-matrix order.
pub fn render(doc: &ReportDocument) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Summary ({} processes, run {})", doc.processes, doc.run_id);
    let _ = writeln!(out, "-------");

    for scenario in ScenarioKind::ALL {
        let rows: Vec<_> = doc.results.iter().filter(|r| r.scenario == scenario).collect();
        if rows.is_empty() {
            continue;
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Scenario: {}", scenario);
        let _ = writeln!(
            out,
            "{:<10} {:>9} {:>6} {:>7} {:>11} {:>11} {:>11} {:>15} {:>7}",
            "backend",
            "data_size",
            "iters",
            "status",
            "write",
            "avg_read",
            "p99_read",
            "throughput",
            "sends"
        );

        for r in rows {
            let p99 = r
                .read_latency
                .as_ref()
                .map(|l| LatencySummary::format_latency(l.p99_ns))
                .unwrap_or_else(|| "-".to_string());

            let _ = writeln!(
                out,
                "{:<10} {:>9} {:>6} {:>7} {:>11} {:>11} {:>11} {:>15} {:>7}",
                r.backend,
                r.data_size,
                r.iterations,
                r.status.to_string(),
                format_seconds(r.write_time_seconds),
                format_seconds(r.avg_read_time_seconds),
                p99,
                format_rate(r.throughput_ops_per_sec),
                r.sends
            );

            if r.status == CellStatus::Failed {
                let kind = r.failure.map(|k| k.to_string()).unwrap_or_default();
                let _ = writeln!(
                    out,
                    "           {} {}",
                    kind,
                    r.error.as_deref().unwrap_or_default()
                );
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} cells, {} failed",
        doc.results.len(),
        doc.failed()
    );
    out
}

/// Print the summary to stdout.
pub fn print_summary(doc: &ReportDocument) {
    print!("{}", render(doc));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::result;
    use ipcbench_core::BenchmarkReport;

    #[test]
    fn test_grouped_by_scenario() {
        let mut report = BenchmarkReport::new();
        report.push(result("shm", ScenarioKind::Streaming, CellStatus::Ok));
        report.push(result("file", ScenarioKind::Shared, CellStatus::Failed));
        report.push(result("socket", ScenarioKind::Shared, CellStatus::Ok));
        let doc = ReportDocument::new("run-x", 4, report);

        let text = render(&doc);
        let shared = text.find("Scenario: shared").unwrap();
        let streaming = text.find("Scenario: streaming").unwrap();
        assert!(shared < streaming);

        let file = text.find("file ").unwrap();
        let socket = text.find("socket ").unwrap();
        assert!(shared < file && file < socket && socket < streaming);

        assert!(text.contains("BackendIOError rank 0: injected"));
        assert!(text.contains("83.33 Kops/s"));
        assert!(text.contains("3 cells, 1 failed"));
    }

    #[test]
    fn test_empty_report() {
        let doc = ReportDocument::new("run-y", 2, BenchmarkReport::new());
        let text = render(&doc);
        assert!(!text.contains("Scenario:"));
        assert!(text.contains("0 cells, 0 failed"));
    }
}
