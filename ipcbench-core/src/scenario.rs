// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Scenario state machines with explicit phases.
//!
//! Shared:    Init -> Publish(0) -> AwaitVisible(0) -> Consume(0) -> Finish -> Done
//! Streaming: Init -> { Publish(i) -> AwaitVisible(i) -> Consume(i) -> AwaitConsumed(i) }
//!            -> Finish -> Done
//!
//! The phase sequence depends only on the cell and the backend's delivery
//! model, so every rank walks the same barriers in the same order. A rank whose
//! backend failed keeps walking the phases without touching the backend.

use std::fmt;

use crate::backend::{Backend, Delivery};
use crate::coord::RunContext;
use crate::dataset::Dataset;
use crate::error::{BackendError, CoordinationError};
use crate::metrics::{MetricsCollector, Operation, TimingSample};
use crate::types::{BenchmarkCell, Role, ScenarioKind};

/// Phase of a scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    /// Writer publishes payload `i`.
    Publish(u64),
    /// Rendezvous: payload `i` is visible before anyone reads it.
    AwaitVisible(u64),
    /// Readers consume payload `i` (all `iterations` reads in Shared).
    Consume(u64),
    /// Rendezvous: every reader is done with payload `i` before it is overwritten.
    AwaitConsumed(u64),
    /// Rendezvous before cleanup.
    Finish,
    Done,
}

impl Phase {
    pub const fn name(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Publish(_) => "publish",
            Phase::AwaitVisible(_) => "visible",
            Phase::Consume(_) => "consume",
            Phase::AwaitConsumed(_) => "consumed",
            Phase::Finish => "finish",
            Phase::Done => "done",
        }
    }

    /// Successor of this phase. `Done` is terminal.
    pub fn next(self, scenario: ScenarioKind, iterations: u64) -> Phase {
        match (self, scenario) {
            (Phase::Init, _) if iterations == 0 => Phase::Finish,
            (Phase::Init, _) => Phase::Publish(0),
            (Phase::Publish(i), _) => Phase::AwaitVisible(i),
            (Phase::AwaitVisible(i), _) => Phase::Consume(i),
            (Phase::Consume(_), ScenarioKind::Shared) => Phase::Finish,
            (Phase::Consume(i), ScenarioKind::Streaming) => Phase::AwaitConsumed(i),
            (Phase::AwaitConsumed(i), _) if i + 1 < iterations => Phase::Publish(i + 1),
            (Phase::AwaitConsumed(_), _) => Phase::Finish,
            (Phase::Finish, _) | (Phase::Done, _) => Phase::Done,
        }
    }

    /// Whether all ranks rendezvous in this phase.
    ///
    /// The Shared scenario and every shared-storage backend synchronize between
    /// write and read. Streaming over message-passing relies on the blocking
    /// read alone: a delivery cannot be overwritten.
    pub fn is_barrier(&self, scenario: ScenarioKind, delivery: Delivery) -> bool {
        match self {
            Phase::Finish => true,
            Phase::AwaitVisible(_) => {
                scenario == ScenarioKind::Shared || delivery.is_shared_storage()
            }
            Phase::AwaitConsumed(_) => delivery.is_shared_storage(),
            _ => false,
        }
    }

    /// Barrier tag, unique per cell and phase.
    pub fn barrier_tag(&self, cell: &BenchmarkCell) -> String {
        match self {
            Phase::AwaitVisible(i) | Phase::AwaitConsumed(i) => {
                format!("{}:{}:{}", cell.key(), self.name(), i)
            }
            _ => format!("{}:{}", cell.key(), self.name()),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Publish(i)
            | Phase::AwaitVisible(i)
            | Phase::Consume(i)
            | Phase::AwaitConsumed(i) => write!(f, "{}({})", self.name(), i),
            _ => f.write_str(self.name()),
        }
    }
}

/// Upper bound on timing samples reserved up front.
const MAX_PREALLOCATED_SAMPLES: u64 = 1 << 16;

/// Samples to reserve for `role` in `cell`; larger runs grow on demand.
fn sample_capacity(role: Role, cell: &BenchmarkCell) -> usize {
    let expected = match (role, cell.scenario()) {
        (Role::Writer, ScenarioKind::Shared) => 1,
        _ => cell.iterations(),
    };
    expected.min(MAX_PREALLOCATED_SAMPLES) as usize
}

/// What a rank takes away from a scenario run.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub samples: Vec<TimingSample>,
    /// First backend failure; later backend calls were skipped.
    pub error: Option<BackendError>,
    pub writes: u64,
    pub transitions: u64,
}

/// Drives one scenario of one cell on one rank.
pub struct ScenarioRunner<'a> {
    ctx: &'a RunContext<'a>,
    cell: &'a BenchmarkCell,
    backend: &'a mut dyn Backend,
    delivery: Delivery,
    phase: Phase,
    metrics: MetricsCollector,
    error: Option<BackendError>,
    /// Expected payload for Shared verification, generated once.
    shared_payload: Option<Dataset>,
    writes: u64,
    transitions: u64,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        ctx: &'a RunContext<'a>,
        cell: &'a BenchmarkCell,
        backend: &'a mut dyn Backend,
    ) -> Self {
        let delivery = backend.delivery();
        let capacity = sample_capacity(ctx.role(), cell);

        Self {
            ctx,
            cell,
            backend,
            delivery,
            phase: Phase::Init,
            metrics: MetricsCollector::with_capacity(capacity),
            error: None,
            shared_payload: None,
            writes: 0,
            transitions: 0,
        }
    }

    /// Start in the failed state: walk every barrier without touching the backend.
    pub fn failed(mut self, error: BackendError) -> Self {
        self.error = Some(error);
        self
    }

    /// Run every phase to `Done`.
    ///
    /// Backend failures are kept in the outcome; only coordination failures
    /// abort with an error.
    pub fn run(mut self) -> Result<ScenarioOutcome, CoordinationError> {
        while self.phase != Phase::Done {
            self.step()?;
        }

        Ok(ScenarioOutcome {
            samples: self.metrics.into_samples(),
            error: self.error,
            writes: self.writes,
            transitions: self.transitions,
        })
    }

    /// Execute the current phase and advance.
    fn step(&mut self) -> Result<(), CoordinationError> {
        let scenario = self.cell.scenario();

        if self.phase.is_barrier(scenario, self.delivery) {
            self.ctx.barrier(&self.phase.barrier_tag(self.cell))?;
        } else if self.error.is_none() {
            let result = match (self.phase, self.ctx.role()) {
                (Phase::Publish(i), Role::Writer) => self.publish(i),
                (Phase::Consume(i), Role::Reader) => self.consume(i),
                _ => Ok(()),
            };

            if let Err(e) = result {
                tracing::warn!(
                    rank = self.ctx.rank(),
                    backend = self.backend.name(),
                    phase = %self.phase,
                    error = %e,
                    "Backend operation failed; skipping remaining operations of this cell"
                );
                self.error = Some(e);
            }
        }

        let next = self.phase.next(scenario, self.cell.iterations());
        tracing::trace!(rank = self.ctx.rank(), from = %self.phase, to = %next, "Phase transition");
        self.phase = next;
        self.transitions += 1;
        Ok(())
    }

    fn payload(&self, iteration: u64) -> Dataset {
        match self.cell.scenario() {
            ScenarioKind::Shared => Dataset::for_cell(self.cell),
            ScenarioKind::Streaming => Dataset::for_iteration(self.cell, iteration),
        }
    }

    fn publish(&mut self, iteration: u64) -> Result<(), BackendError> {
        // Generated outside the timed section; never mutated afterwards.
        let dataset = self.payload(iteration);
        let backend = &mut *self.backend;
        self.metrics
            .time(Operation::Write, || backend.write(&dataset))?;
        self.writes += 1;
        Ok(())
    }

    fn consume(&mut self, iteration: u64) -> Result<(), BackendError> {
        let reads = match self.cell.scenario() {
            ScenarioKind::Shared => self.cell.iterations(),
            ScenarioKind::Streaming => 1,
        };

        for read in 0..reads {
            let dataset = self.read_with_retry()?;
            if self.ctx.config().verify_reads {
                self.verify(&dataset, iteration, read)?;
            }
        }
        Ok(())
    }

    /// Read, retrying `NotReady` with bounded exponential backoff.
    fn read_with_retry(&mut self) -> Result<Dataset, BackendError> {
        let policy = self.ctx.config().retry;
        let mut attempts = 0u32;

        loop {
            let backend = &mut *self.backend;
            match self.metrics.time(Operation::Read, || backend.read()) {
                Ok(dataset) => return Ok(dataset),
                Err(BackendError::NotReady) => {
                    attempts += 1;
                    if attempts >= policy.max_attempts {
                        return Err(BackendError::ReadNotReady { attempts });
                    }
                    std::thread::sleep(policy.backoff(attempts));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn verify(&mut self, dataset: &Dataset, iteration: u64, read: u64) -> Result<(), BackendError> {
        let matches = match self.cell.scenario() {
            ScenarioKind::Shared => {
                let cell = self.cell;
                let expected = self
                    .shared_payload
                    .get_or_insert_with(|| Dataset::for_cell(cell));
                *dataset == *expected
            }
            ScenarioKind::Streaming => *dataset == Dataset::for_iteration(self.cell, iteration),
        };

        if matches {
            Ok(())
        } else {
            Err(BackendError::Mismatch { iteration, read })
        }
    }
}
