// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! ipcbench Reporting
//!
//! Turns the cell results of a run into a persisted report document and a
//! human-readable summary.
//!
//! # Data Output
//!
//! Every run writes one JSON file: suite, version, UTC timestamp, run id,
//! process count and system information around the ordered cell results.
//! Criterion micro-benchmarks of single-process backend round-trips live in
//! `benches/`.

pub mod report;
pub mod reporter;
pub mod summary;

pub use report::{format_rate, format_seconds, ReportDocument, SystemInfo, SUITE_NAME};
pub use reporter::{JsonReporter, ReporterError};
pub use summary::print_summary;
