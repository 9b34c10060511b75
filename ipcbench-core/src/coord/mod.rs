// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-group coordination: role assignment, barriers and gather.
//!
//! Every suspension point of a run is an explicit collective call on a
//! [`Communicator`]. Barriers carry a tag; all ranks must present the same tag,
//! otherwise the group has diverged and the run aborts.

mod local;
mod socket;

use crate::config::RunConfig;
use crate::error::{ConfigurationError, CoordinationError};
use crate::types::Role;

pub use local::{LocalComm, LocalGroup};
pub use socket::{
    GroupEnv, SocketGroup, ENV_COORDINATOR, ENV_RANK, ENV_RUN_ID, ENV_SIZE, MAX_PART,
};

/// Collective primitives shared by all processes of a run.
pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until every rank reached the barrier named `tag`.
    fn barrier(&self, tag: &str) -> Result<(), CoordinationError>;

    /// Send `part` to rank 0. Rank 0 receives every part in rank order.
    fn gather(&self, part: Vec<u8>) -> Result<Option<Vec<Vec<u8>>>, CoordinationError>;

    /// Largest part `gather` accepts from this rank.
    fn max_part_len(&self) -> usize {
        usize::MAX
    }

    /// Best-effort notice to the other ranks that this one is giving up.
    fn abort(&self, reason: &str);
}

/// Explicit per-process run context threaded through every call.
pub struct RunContext<'a> {
    rank: usize,
    size: usize,
    role: Role,
    comm: &'a dyn Communicator,
    config: &'a RunConfig,
}

impl<'a> RunContext<'a> {
    /// Validate the group shape and assign the role for this rank.
    pub fn new(
        comm: &'a dyn Communicator,
        config: &'a RunConfig,
    ) -> Result<Self, ConfigurationError> {
        let size = comm.size();
        let rank = comm.rank();

        if size < 2 {
            return Err(ConfigurationError::InsufficientProcesses { size });
        }

        if rank >= size {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "rank",
                value: rank.to_string(),
                reason: format!("Rank must be below group size {}", size),
            });
        }

        Ok(Self {
            rank,
            size,
            role: Role::for_rank(rank),
            comm,
            config,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn readers(&self) -> usize {
        self.size - 1
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The aggregating process.
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm
    }

    pub fn config(&self) -> &RunConfig {
        self.config
    }

    pub fn barrier(&self, tag: &str) -> Result<(), CoordinationError> {
        tracing::trace!(rank = self.rank, tag = %tag, "Barrier");
        self.comm.barrier(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    #[test]
    fn test_context_requires_two_processes() {
        let config = ConfigLoader::defaults().unwrap();
        let comms = LocalGroup::new(1, None);
        assert!(matches!(
            RunContext::new(&comms[0], &config),
            Err(ConfigurationError::InsufficientProcesses { size: 1 })
        ));
    }

    #[test]
    fn test_context_roles() {
        let config = ConfigLoader::defaults().unwrap();
        let comms = LocalGroup::new(3, None);

        let writer = RunContext::new(&comms[0], &config).unwrap();
        assert_eq!(writer.role(), Role::Writer);
        assert!(writer.is_root());
        assert_eq!(writer.readers(), 2);

        let reader = RunContext::new(&comms[2], &config).unwrap();
        assert_eq!(reader.role(), Role::Reader);
        assert!(!reader.is_root());
    }
}
