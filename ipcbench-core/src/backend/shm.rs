// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shm` backend: one POSIX shared memory slot, overwritten in place.

use std::path::Path;

use super::{require_role, Backend, Delivery, Endpoint};
use crate::dataset::Dataset;
use crate::error::BackendError;
use crate::shm::{PublishSlot, RegionError, SharedMemoryRegion, ShmError, SlotRead};
use crate::types::Role;

const NAME: &str = "shm";

/// Shared-storage backend over a seqlock-versioned shared memory slot.
pub struct ShmBackend {
    slot_bytes: usize,
    endpoint: Option<Endpoint>,
    slot: Option<PublishSlot>,
    sends: u64,
}

impl ShmBackend {
    pub fn new(slot_bytes: usize) -> Self {
        Self {
            slot_bytes,
            endpoint: None,
            slot: None,
            sends: 0,
        }
    }

    fn slot(&self, operation: &'static str) -> Result<&PublishSlot, BackendError> {
        self.slot
            .as_ref()
            .ok_or_else(|| BackendError::io(NAME, operation, "slot not attached"))
    }
}

pub(crate) fn map_region_error(
    backend: &str,
    identity: &str,
    operation: &'static str,
    err: ShmError,
) -> BackendError {
    match err {
        ShmError::Region(RegionError::AlreadyExists { .. }) => BackendError::ResourceConflict {
            backend: backend.to_string(),
            identity: identity.to_string(),
        },
        other => BackendError::io(backend, operation, other),
    }
}

/// POSIX shared memory is backed by /dev/shm on Linux.
pub(crate) fn check_shm_available(backend: &str) -> Result<(), BackendError> {
    if cfg!(target_os = "linux") && !Path::new("/dev/shm").is_dir() {
        return Err(BackendError::Unavailable {
            backend: backend.to_string(),
            reason: "/dev/shm is not mounted".to_string(),
        });
    }
    Ok(())
}

impl Backend for ShmBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn delivery(&self) -> Delivery {
        Delivery::SharedStorage
    }

    fn initialize(&mut self, endpoint: &Endpoint) -> Result<(), BackendError> {
        check_shm_available(NAME)?;

        let identity = endpoint.identity.as_str();
        let slot = match endpoint.role {
            Role::Writer => SharedMemoryRegion::create(identity, self.slot_bytes)
                .map_err(ShmError::from)
                .and_then(PublishSlot::create),
            Role::Reader => SharedMemoryRegion::open(identity)
                .map_err(ShmError::from)
                .and_then(PublishSlot::attach),
        }
        .map_err(|e| map_region_error(NAME, identity, "initialize", e))?;

        tracing::debug!(
            backend = NAME,
            identity = %identity,
            role = %endpoint.role,
            capacity = slot.capacity(),
            "Attached shared memory slot"
        );

        self.slot = Some(slot);
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn write(&mut self, dataset: &Dataset) -> Result<(), BackendError> {
        require_role(NAME, self.endpoint.as_ref(), Role::Writer, "write")?;
        let bytes = dataset.seal()?;
        self.slot("write")?
            .publish(&bytes)
            .map_err(|e| BackendError::io(NAME, "write", e))?;
        self.sends += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Dataset, BackendError> {
        require_role(NAME, self.endpoint.as_ref(), Role::Reader, "read")?;
        match self
            .slot("read")?
            .read()
            .map_err(|e| BackendError::io(NAME, "read", e))?
        {
            SlotRead::Empty | SlotRead::Busy => Err(BackendError::NotReady),
            SlotRead::Ready(bytes) => Ok(Dataset::open(&bytes)?),
        }
    }

    fn cleanup(&mut self) -> Result<(), BackendError> {
        // Dropping the owner's region unlinks the name.
        if self.slot.take().is_some() {
            tracing::debug!(backend = NAME, "Released shared memory slot");
        }
        self.endpoint = None;
        Ok(())
    }

    fn sends(&self) -> u64 {
        self.sends
    }
}
