// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Run-matrix driver.
//!
//! Walks the cells in a fixed order. For every cell each process builds a
//! fresh backend, binds it, runs the scenario, releases it, and ships its
//! metrics to rank 0. Backend failures stay inside their cell; coordination
//! failures end the run for the whole group.

use crate::aggregate::{aggregate, BenchmarkReport, CellStatus, ScenarioResult};
use crate::backend::{Backend, BackendRegistry, Endpoint};
use crate::coord::RunContext;
use crate::error::{
    BackendError, BenchResult, ConfigurationError, CoordinationError, FailureKind,
};
use crate::metrics::{ProcessError, ProcessMetrics};
use crate::scenario::ScenarioRunner;
use crate::types::{BenchmarkCell, ScenarioKind};

/// Ordered cross product of backends x scenarios x data sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMatrix {
    cells: Vec<BenchmarkCell>,
}

impl RunMatrix {
    /// Backend-major order: backend, then scenario, then data size.
    pub fn new(
        backends: &[String],
        scenarios: &[ScenarioKind],
        data_sizes: &[usize],
        iterations: u64,
    ) -> Result<Self, ConfigurationError> {
        if scenarios.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "scenario",
                value: String::new(),
                reason: "No scenario selected".to_string(),
            });
        }

        if data_sizes.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "data_size",
                value: String::new(),
                reason: "No data size selected".to_string(),
            });
        }

        let mut cells = Vec::with_capacity(backends.len() * scenarios.len() * data_sizes.len());
        for backend in backends {
            for &scenario in scenarios {
                for &data_size in data_sizes {
                    cells.push(BenchmarkCell::new(
                        backend.as_str(),
                        scenario,
                        data_size,
                        iterations,
                    )?);
                }
            }
        }

        if cells.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "backend",
                value: String::new(),
                reason: "No backend selected".to_string(),
            });
        }

        Ok(Self { cells })
    }

    /// Expand a backend selection (`all` or names) against `registry` first.
    pub fn resolve(
        registry: &BackendRegistry,
        backends: &[String],
        scenarios: &[ScenarioKind],
        data_sizes: &[usize],
        iterations: u64,
    ) -> Result<Self, ConfigurationError> {
        let backends = registry.resolve(backends)?;
        Self::new(&backends, scenarios, data_sizes, iterations)
    }

    pub fn cells(&self) -> &[BenchmarkCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Short hash over every cell key. Ranks that parsed different
    /// parameters disagree on it at the first barrier.
    pub fn fingerprint(&self) -> String {
        let mut hasher = crc32fast::Hasher::new();
        for cell in &self.cells {
            hasher.update(cell.key().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:08x}", hasher.finalize())
    }
}

/// Outcome of one cell as seen by rank 0.
#[derive(Debug, Clone)]
pub struct CellRecord {
    pub result: ScenarioResult,
    /// Gathered metrics in rank order.
    pub processes: Vec<ProcessMetrics>,
}

/// Releases the backend on every exit path.
struct BackendGuard {
    backend: Box<dyn Backend>,
    released: bool,
}

impl BackendGuard {
    fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            released: false,
        }
    }

    fn release(&mut self) -> Result<(), BackendError> {
        self.released = true;
        self.backend.cleanup()
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.backend.cleanup() {
            tracing::error!(
                backend = self.backend.name(),
                error = %e,
                "Failed to release backend"
            );
        }
    }
}

/// Executes cells on one process of the group.
pub struct Driver<'a> {
    ctx: &'a RunContext<'a>,
    registry: &'a BackendRegistry,
}

impl<'a> Driver<'a> {
    pub fn new(ctx: &'a RunContext<'a>, registry: &'a BackendRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Run the whole matrix. Rank 0 gets the report; other ranks get `None`.
    ///
    /// Any error returned here is run-scoped and has already been signalled to
    /// the rest of the group.
    pub fn run_matrix(&self, matrix: &RunMatrix) -> BenchResult<Option<BenchmarkReport>> {
        let result = self.run_all(matrix);
        if let Err(e) = &result {
            tracing::error!(rank = self.ctx.rank(), error = %e, "Run aborted");
            self.ctx.comm().abort(&e.to_string());
        }
        result
    }

    fn run_all(&self, matrix: &RunMatrix) -> BenchResult<Option<BenchmarkReport>> {
        let prefix = &self.ctx.config().resource_prefix;
        for cell in matrix.cells() {
            cell.identity(prefix)?;
            if !self.registry.contains(cell.backend()) {
                return Err(ConfigurationError::UnknownBackend {
                    name: cell.backend().to_string(),
                }
                .into());
            }
        }

        let fingerprint = matrix.fingerprint();
        tracing::info!(
            rank = self.ctx.rank(),
            readers = self.ctx.readers(),
            cells = matrix.len(),
            fingerprint = %fingerprint,
            "Starting run matrix"
        );
        self.ctx.barrier(&format!("matrix:{}", fingerprint))?;

        let mut report = self.ctx.is_root().then(BenchmarkReport::new);

        for cell in matrix.cells() {
            let record = self.run_cell(cell)?;
            if let (Some(report), Some(record)) = (report.as_mut(), record) {
                report.push(record.result);
            }
        }

        if let Some(report) = &report {
            tracing::info!(
                cells = report.len(),
                failed = report.failed(),
                "Run matrix complete"
            );
        }
        Ok(report)
    }

    /// Run one cell on this process. Rank 0 returns the aggregated record.
    ///
    /// Backend failures end up in the record; coordination and configuration
    /// failures are returned as errors.
    pub fn run_cell(&self, cell: &BenchmarkCell) -> BenchResult<Option<CellRecord>> {
        let ctx = self.ctx;
        let key = cell.key();

        ctx.barrier(&format!("cell:{}", key))?;
        tracing::info!(
            rank = ctx.rank(),
            backend = cell.backend(),
            scenario = %cell.scenario(),
            data_size = cell.data_size(),
            iterations = cell.iterations(),
            "Running cell"
        );

        let identity = cell.identity(&ctx.config().resource_prefix)?;
        let endpoint = Endpoint::for_cell(cell, identity, ctx.rank(), ctx.size());
        let backend = self.registry.create(cell.backend(), &ctx.config().backends)?;
        let mut guard = BackendGuard::new(backend);
        let delivery = guard.backend.delivery();

        // Writer binds first, readers attach once the resource exists.
        let mut failure = None;
        if ctx.role().is_writer() {
            failure = self.initialize(&mut guard, &endpoint);
        }
        ctx.barrier(&format!("{}:bound", key))?;
        if !ctx.role().is_writer() {
            failure = self.initialize(&mut guard, &endpoint);
        }
        ctx.barrier(&format!("{}:attached", key))?;

        let mut runner = ScenarioRunner::new(ctx, cell, guard.backend.as_mut());
        if let Some(e) = failure {
            runner = runner.failed(e);
        }
        let outcome = runner.run()?;
        tracing::debug!(
            rank = ctx.rank(),
            writes = outcome.writes,
            samples = outcome.samples.len(),
            transitions = outcome.transitions,
            "Scenario finished"
        );

        let sends = guard.backend.sends();
        let mut error = outcome.error;
        if let Err(e) = guard.release() {
            tracing::error!(
                rank = ctx.rank(),
                backend = cell.backend(),
                error = %e,
                "Failed to release backend"
            );
            error.get_or_insert(e);
        }
        tracing::debug!(
            rank = ctx.rank(),
            identity = %endpoint.identity,
            "Released cell resources"
        );

        let metrics = ProcessMetrics {
            rank: ctx.rank(),
            role: ctx.role(),
            samples: outcome.samples,
            sends,
            error: error.as_ref().map(ProcessError::from),
        };

        let Some(parts) = ctx.comm().gather(self.encode_part(metrics)?)? else {
            return Ok(None);
        };

        let processes = parts
            .iter()
            .enumerate()
            .map(|(rank, bytes)| {
                let metrics = ProcessMetrics::decode(bytes)?;
                if metrics.rank != rank {
                    return Err(CoordinationError::Protocol {
                        reason: format!("part {} carries metrics of rank {}", rank, metrics.rank),
                    });
                }
                Ok(metrics)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = aggregate(cell, delivery, &processes);
        match result.status {
            CellStatus::Ok => tracing::info!(
                backend = cell.backend(),
                scenario = %cell.scenario(),
                data_size = cell.data_size(),
                read_count = result.read_count,
                throughput = result.throughput_ops_per_sec,
                "Cell complete"
            ),
            CellStatus::Failed => tracing::warn!(
                backend = cell.backend(),
                scenario = %cell.scenario(),
                data_size = cell.data_size(),
                error = result.error.as_deref().unwrap_or_default(),
                "Cell failed"
            ),
        }

        Ok(Some(CellRecord { result, processes }))
    }

    /// Encode metrics for the gather. Samples that do not fit the
    /// communicator's part limit are dropped and the cell is failed instead.
    fn encode_part(&self, mut metrics: ProcessMetrics) -> Result<Vec<u8>, CoordinationError> {
        let limit = self.ctx.comm().max_part_len();
        let part = metrics.encode()?;
        if part.len() <= limit {
            return Ok(part);
        }

        let message = format!(
            "{} timing samples ({} bytes) exceed the gather limit of {} bytes",
            metrics.samples.len(),
            part.len(),
            limit
        );
        tracing::error!(rank = metrics.rank, error = %message, "Metrics too large to gather");
        metrics.samples = Vec::new();
        metrics.error.get_or_insert(ProcessError {
            kind: FailureKind::BackendIoError,
            message,
        });
        metrics.encode()
    }

    fn initialize(&self, guard: &mut BackendGuard, endpoint: &Endpoint) -> Option<BackendError> {
        tracing::debug!(
            rank = endpoint.rank,
            role = endpoint.role.name(),
            identity = %endpoint.identity,
            "Initializing backend"
        );
        match guard.backend.initialize(endpoint) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    rank = endpoint.rank,
                    backend = guard.backend.name(),
                    error = %e,
                    "Backend initialization failed"
                );
                Some(e)
            }
        }
    }
}
