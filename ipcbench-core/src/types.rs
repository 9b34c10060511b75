// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and small value types shared by every module.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Maximum length of a resource identity. POSIX shm names and socket
/// paths both have to fit, so stay well below either limit.
const MAX_IDENTITY_LEN: usize = 96;

/// Role of a process for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Writer,
    Reader,
}

impl Role {
    /// Ordinal 0 writes, everyone else reads.
    pub const fn for_rank(rank: usize) -> Self {
        if rank == 0 {
            Self::Writer
        } else {
            Self::Reader
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Writer => "writer",
            Self::Reader => "reader",
        }
    }

    pub const fn is_writer(&self) -> bool {
        matches!(self, Self::Writer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Workload shape of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Write once, every reader reads `iterations` times.
    Shared,
    /// `iterations` fresh payloads, each consumed once by every reader.
    Streaming,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 2] = [ScenarioKind::Shared, ScenarioKind::Streaming];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Streaming => "streaming",
        }
    }

    /// Parse a single scenario name, or `both`.
    pub fn parse_selection(value: &str) -> Result<Vec<ScenarioKind>, ConfigurationError> {
        match value.to_ascii_lowercase().as_str() {
            "shared" => Ok(vec![Self::Shared]),
            "streaming" => Ok(vec![Self::Streaming]),
            "both" | "all" => Ok(Self::ALL.to_vec()),
            _ => Err(ConfigurationError::InvalidFieldValue {
                field: "scenario",
                value: value.to_string(),
                reason: "Must be one of shared, streaming, both".to_string(),
            }),
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the OS-level resource a backend binds for one cell.
/// Alphanumeric with hyphens/underscores, usable as a shm name and a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    pub fn new(identity: impl Into<String>) -> Result<Self, ConfigurationError> {
        let identity = identity.into();

        if identity.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "resource_identity",
                value: identity,
                reason: "Identity cannot be empty".to_string(),
            });
        }

        if identity.len() > MAX_IDENTITY_LEN {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "resource_identity",
                value: identity.clone(),
                reason: format!(
                    "Identity too long: {} chars (max {})",
                    identity.len(),
                    MAX_IDENTITY_LEN
                ),
            });
        }

        if !identity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "resource_identity",
                value: identity,
                reason: "Identity must contain only ASCII alphanumerics, hyphens, and underscores"
                    .to_string(),
            });
        }

        Ok(Self(identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourceIdentity {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceIdentity> for String {
    fn from(id: ResourceIdentity) -> Self {
        id.0
    }
}

/// Largest iteration count of a cell. Shared-scenario message passing
/// delivers one copy per iteration and counts copies in a `u32`.
pub const MAX_ITERATIONS: u64 = u32::MAX as u64;

/// One unit of the run matrix. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BenchmarkCell {
    backend: String,
    scenario: ScenarioKind,
    data_size: usize,
    iterations: u64,
}

impl BenchmarkCell {
    pub fn new(
        backend: impl Into<String>,
        scenario: ScenarioKind,
        data_size: usize,
        iterations: u64,
    ) -> Result<Self, ConfigurationError> {
        let backend = backend.into();

        if backend.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "backend",
                value: backend,
                reason: "Backend name cannot be empty".to_string(),
            });
        }

        if data_size == 0 {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "data_size",
                value: "0".to_string(),
                reason: "A dataset needs at least one entry".to_string(),
            });
        }

        if iterations > MAX_ITERATIONS {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "iterations",
                value: iterations.to_string(),
                reason: format!("At most {} iterations per cell", MAX_ITERATIONS),
            });
        }

        Ok(Self {
            backend,
            scenario,
            data_size,
            iterations,
        })
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn scenario(&self) -> ScenarioKind {
        self.scenario
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Stable fingerprint; every process must compute the same one.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.backend, self.scenario, self.data_size, self.iterations
        )
    }

    /// Deterministic dataset seed derived from the cell parameters.
    pub fn seed(&self) -> u64 {
        let hi = crc32fast::hash(self.key().as_bytes()) as u64;
        let lo = crc32fast::hash(format!("{}#{}", self.data_size, self.backend).as_bytes()) as u64;
        (hi << 32) | lo
    }

    /// Resource identity for this cell under the given prefix.
    ///
    /// Deliberately independent of backend and scenario: consecutive cells of the
    /// same data size reuse one identity, which only works if release is complete.
    pub fn identity(&self, prefix: &str) -> Result<ResourceIdentity, ConfigurationError> {
        ResourceIdentity::new(format!("{}_{}", prefix, self.data_size))
    }
}

impl fmt::Display for BenchmarkCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} entries x {}",
            self.backend, self.scenario, self.data_size, self.iterations
        )
    }
}
