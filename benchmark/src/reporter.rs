// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! JSON report persistence.
//!
//! Saves report documents to timestamped JSON files in the output directory.

use crate::report::{ReportDocument, SUITE_NAME};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during report persistence.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("Report I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON reporter for run reports.
pub struct JsonReporter {
    /// Output directory for report files
    output_dir: PathBuf,
}

impl JsonReporter {
    /// Create a new JSON reporter with the specified output directory.
    pub fn new(output_dir: impl AsRef<Path>) -> Result<Self, ReporterError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File name for `doc`: suite, UTC timestamp and the head of the run id,
    /// so two runs finishing in the same second do not collide.
    pub fn file_name(doc: &ReportDocument) -> String {
        let timestamp = doc.timestamp.format("%Y-%m-%dT%H-%M-%SZ");
        let run: String = doc
            .run_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();

        if run.is_empty() {
            format!("{}_{}.json", SUITE_NAME, timestamp)
        } else {
            format!("{}_{}_{}.json", SUITE_NAME, timestamp, run)
        }
    }

    /// Save a report document to a JSON file.
    ///
    /// Returns the path to the created file.
    pub fn save(&self, doc: &ReportDocument) -> Result<PathBuf, ReporterError> {
        let filepath = self.output_dir.join(Self::file_name(doc));

        let file = File::create(&filepath)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, doc)?;
        writer.flush()?;

        tracing::info!(path = %filepath.display(), cells = doc.results.len(), "Report saved");
        Ok(filepath)
    }

    /// List all existing report files in the output directory.
    pub fn list_reports(&self) -> Result<Vec<PathBuf>, ReporterError> {
        let mut reports = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                reports.push(path);
            }
        }
        reports.sort();
        Ok(reports)
    }

    /// Load an existing report from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<ReportDocument, ReporterError> {
        let file = File::open(path)?;
        let doc = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(doc)
    }
}
