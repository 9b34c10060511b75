// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Backend capability contract.
//!
//! Every IPC mechanism implements [`Backend`]: initialize, write, read,
//! cleanup and a stable name. A backend also declares how it delivers data,
//! which decides both the scenario's barrier schedule and how sends are counted.
//!
//! Backends are looked up by name through [`BackendRegistry`].

mod file;
mod registry;
mod shm;
mod shm_log;
mod socket;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::dataset::Dataset;
use crate::error::BackendError;
use crate::types::{BenchmarkCell, ResourceIdentity, Role, ScenarioKind};

pub use file::FileBackend;
pub use registry::{BackendFactory, BackendRegistry, ALL_BACKENDS};
pub use shm::ShmBackend;
pub use shm_log::ShmLogBackend;
pub use socket::SocketBackend;

/// How a message-passing backend reaches every reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanOut {
    /// One send is observed by all readers.
    Broadcast,
    /// One explicit send per reader.
    PointToPoint,
}

/// Delivery model declared by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Published once, read many times from an addressable location.
    SharedStorage,
    /// Each delivery is consumed at most once.
    MessagePassing(FanOut),
}

impl Delivery {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SharedStorage => "shared-storage",
            Self::MessagePassing(FanOut::Broadcast) => "broadcast",
            Self::MessagePassing(FanOut::PointToPoint) => "point-to-point",
        }
    }

    pub const fn is_shared_storage(&self) -> bool {
        matches!(self, Self::SharedStorage)
    }

    /// Sends a single `write` accounts for.
    pub fn sends_per_write(&self, readers: usize, copies: u32) -> u64 {
        match self {
            Self::SharedStorage => 1,
            Self::MessagePassing(FanOut::Broadcast) => copies as u64,
            Self::MessagePassing(FanOut::PointToPoint) => readers as u64 * copies as u64,
        }
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Delivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared-storage" => Ok(Self::SharedStorage),
            "broadcast" => Ok(Self::MessagePassing(FanOut::Broadcast)),
            "point-to-point" => Ok(Self::MessagePassing(FanOut::PointToPoint)),
            other => Err(format!("unknown delivery model '{}'", other)),
        }
    }
}

impl Serialize for Delivery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Delivery {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Everything a backend needs to bind its resource for one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub identity: ResourceIdentity,
    pub role: Role,
    pub rank: usize,
    /// Number of reader processes in the group.
    pub readers: usize,
    /// Deliveries each `write` hands to every reader (message-passing only).
    pub deliveries_per_write: u32,
}

impl Endpoint {
    /// Endpoint of `rank` in a group of `size` for `cell`.
    ///
    /// In the Shared scenario a single write must feed `iterations` reads on
    /// every reader, so message-passing backends deliver that many copies.
    pub fn for_cell(
        cell: &BenchmarkCell,
        identity: ResourceIdentity,
        rank: usize,
        size: usize,
    ) -> Self {
        let deliveries_per_write = match cell.scenario() {
            ScenarioKind::Shared => u32::try_from(cell.iterations().max(1)).unwrap_or(u32::MAX),
            ScenarioKind::Streaming => 1,
        };

        Self {
            identity,
            role: Role::for_rank(rank),
            rank,
            readers: size.saturating_sub(1),
            deliveries_per_write,
        }
    }

    /// Zero-based reader index, `None` for the writer.
    pub fn reader_index(&self) -> Option<usize> {
        match self.role {
            Role::Writer => None,
            Role::Reader => Some(self.rank.saturating_sub(1)),
        }
    }
}

/// Capability set of an IPC mechanism.
///
/// One instance is created per process per cell. `cleanup` must be safe to
/// call at any point, including after a failed `initialize`, and more than once.
pub trait Backend: Send {
    /// Stable identifier used in reports.
    fn name(&self) -> &'static str;

    fn delivery(&self) -> Delivery;

    /// Establish or attach to the resource named by `endpoint.identity`.
    fn initialize(&mut self, endpoint: &Endpoint) -> Result<(), BackendError>;

    /// Writer only. Returns once the data is visible (shared-storage) or
    /// accepted by the transport (message-passing).
    fn write(&mut self, dataset: &Dataset) -> Result<(), BackendError>;

    /// Reader only. Shared-storage backends return [`BackendError::NotReady`]
    /// when nothing was published yet; message-passing backends block instead.
    fn read(&mut self) -> Result<Dataset, BackendError>;

    /// Release every OS resource. Idempotent.
    fn cleanup(&mut self) -> Result<(), BackendError>;

    /// Deliverable sends performed so far.
    fn sends(&self) -> u64;
}

/// Check that an operation is called after `initialize` by the right role.
pub(crate) fn require_role<'a>(
    backend: &str,
    endpoint: Option<&'a Endpoint>,
    expected: Role,
    operation: &'static str,
) -> Result<&'a Endpoint, BackendError> {
    let endpoint =
        endpoint.ok_or_else(|| BackendError::io(backend, operation, "backend not initialized"))?;

    if endpoint.role != expected {
        return Err(BackendError::RoleViolation {
            backend: backend.to_string(),
            operation,
            role: endpoint.role.name(),
        });
    }
    Ok(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_ITERATIONS;

    fn cell(scenario: ScenarioKind, iterations: u64) -> BenchmarkCell {
        BenchmarkCell::new("socket", scenario, 10, iterations).unwrap()
    }

    #[test]
    fn test_endpoint_delivery_plan() {
        let id = ResourceIdentity::new("ep_10").unwrap();

        let shared = Endpoint::for_cell(&cell(ScenarioKind::Shared, 7), id.clone(), 2, 4);
        assert_eq!(shared.role, Role::Reader);
        assert_eq!(shared.readers, 3);
        assert_eq!(shared.deliveries_per_write, 7);
        assert_eq!(shared.reader_index(), Some(1));

        let streaming = Endpoint::for_cell(&cell(ScenarioKind::Streaming, 7), id, 0, 4);
        assert_eq!(streaming.role, Role::Writer);
        assert_eq!(streaming.deliveries_per_write, 1);
        assert_eq!(streaming.reader_index(), None);

        let largest = cell(ScenarioKind::Shared, MAX_ITERATIONS);
        let endpoint = Endpoint::for_cell(&largest, ResourceIdentity::new("ep_10").unwrap(), 1, 2);
        assert_eq!(endpoint.deliveries_per_write, u32::MAX);
        let too_many = BenchmarkCell::new("socket", ScenarioKind::Shared, 10, MAX_ITERATIONS + 1);
        assert!(too_many.is_err());
    }

    #[test]
    fn test_sends_per_write() {
        assert_eq!(Delivery::SharedStorage.sends_per_write(3, 10), 1);
        assert_eq!(
            Delivery::MessagePassing(FanOut::Broadcast).sends_per_write(3, 10),
            10
        );
        assert_eq!(
            Delivery::MessagePassing(FanOut::PointToPoint).sends_per_write(3, 10),
            30
        );
    }

    #[test]
    fn test_delivery_serialization() {
        let json = serde_json::to_string(&Delivery::MessagePassing(FanOut::PointToPoint)).unwrap();
        assert_eq!(json, "\"point-to-point\"");
        let back: Delivery = serde_json::from_str("\"broadcast\"").unwrap();
        assert_eq!(back, Delivery::MessagePassing(FanOut::Broadcast));
        assert!(serde_json::from_str::<Delivery>("\"carrier-pigeon\"").is_err());
    }

    #[test]
    fn test_require_role() {
        let endpoint = Endpoint::for_cell(
            &cell(ScenarioKind::Shared, 1),
            ResourceIdentity::new("ep_1").unwrap(),
            1,
            2,
        );
        assert!(require_role("shm", None, Role::Reader, "read").is_err());
        assert!(require_role("shm", Some(&endpoint), Role::Reader, "read").is_ok());
        assert!(matches!(
            require_role("shm", Some(&endpoint), Role::Writer, "write"),
            Err(BackendError::RoleViolation { role: "reader", .. })
        ));
    }
}
