// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-local timing samples.
//!
//! Each process records one [`TimingSample`] per backend operation while a
//! scenario runs. After the cell, the samples travel to rank 0 inside a
//! [`ProcessMetrics`] part of the collective gather.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, CoordinationError, FailureKind};
use crate::types::Role;

/// Timed backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Write,
    Read,
}

/// One timed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSample {
    pub operation: Operation,
    pub duration_ns: u64,
}

impl TimingSample {
    pub fn new(operation: Operation, duration: Duration) -> Self {
        Self {
            operation,
            duration_ns: duration.as_nanos().min(u64::MAX as u128) as u64,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.duration_ns as f64 / 1e9
    }
}

/// Timer for measuring individual operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Stop the timer and return elapsed duration.
    pub fn elapsed(self) -> Duration {
        self.start.elapsed()
    }
}

/// Measure the execution time of a closure.
pub fn measure<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let timer = Timer::start();
    let result = f();
    (result, timer.elapsed())
}

/// Ordered, append-only sample log of one process for one cell.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    samples: Vec<TimingSample>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, operation: Operation, duration: Duration) {
        self.samples.push(TimingSample::new(operation, duration));
    }

    /// Run `f`, recording its duration only when it succeeds.
    pub fn time<T, E>(
        &mut self,
        operation: Operation,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let (result, elapsed) = measure(f);
        if result.is_ok() {
            self.record(operation, elapsed);
        }
        result
    }

    pub fn samples(&self) -> &[TimingSample] {
        &self.samples
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.samples
            .iter()
            .filter(|s| s.operation == operation)
            .count()
    }

    pub fn into_samples(self) -> Vec<TimingSample> {
        self.samples
    }
}

/// First failure a process hit during a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&BackendError> for ProcessError {
    fn from(err: &BackendError) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

/// Everything one process contributes to the aggregation of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    pub rank: usize,
    pub role: Role,
    pub samples: Vec<TimingSample>,
    /// Deliverable sends performed by this process's backend.
    pub sends: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProcessError>,
}

impl ProcessMetrics {
    /// Wire form for the gather.
    pub fn encode(&self) -> Result<Vec<u8>, CoordinationError> {
        serde_json::to_vec(self).map_err(|e| CoordinationError::Protocol {
            reason: format!("cannot encode metrics of rank {}: {}", self.rank, e),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoordinationError> {
        serde_json::from_slice(bytes).map_err(|e| CoordinationError::Protocol {
            reason: format!("cannot decode gathered metrics: {}", e),
        })
    }

    pub fn durations(&self, operation: Operation) -> impl Iterator<Item = u64> + '_ {
        self.samples
            .iter()
            .filter(move |s| s.operation == operation)
            .map(|s| s.duration_ns)
    }
}
