//! ipcbench Core Library
//!
//! Orchestration engine for benchmarking inter-process communication
//! mechanisms across a group of cooperating processes. Provides the backend
//! contract and registry, concrete shared-memory, file and socket backends,
//! group coordination (barrier, gather), scenario state machines, metrics
//! aggregation and the run-matrix driver.

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod coord;
pub mod dataset;
pub mod driver;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod scenario;
pub mod shm;
pub mod types;

// Re-export commonly used types
pub use aggregate::{BenchmarkReport, CellStatus, LatencySummary, ScenarioResult};
pub use backend::{Backend, BackendRegistry, Delivery, Endpoint, FanOut};
pub use config::{ConfigLoader, RunConfig};
pub use coord::{Communicator, LocalGroup, RunContext, SocketGroup};
pub use dataset::Dataset;
pub use driver::{CellRecord, Driver, RunMatrix};
pub use error::{
    BackendError, BenchError, BenchResult, ConfigurationError, CoordinationError, FailureKind,
};
pub use metrics::{ProcessMetrics, TimingSample};
pub use types::{BenchmarkCell, ResourceIdentity, Role, ScenarioKind};
