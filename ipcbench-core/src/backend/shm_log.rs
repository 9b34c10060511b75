// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shm-log` backend: native broadcast over a shared memory log.
//!
//! One append reaches every reader; each reader consumes it through its own
//! cursor. Reads block (polling with backoff) until a delivery arrives.

use std::time::{Duration, Instant};

use super::shm::{check_shm_available, map_region_error};
use super::{require_role, Backend, Delivery, Endpoint, FanOut};
use crate::dataset::Dataset;
use crate::error::BackendError;
use crate::shm::{BroadcastLog, LogCursor, SharedMemoryRegion, ShmError};
use crate::types::Role;

const NAME: &str = "shm-log";

/// Broadcast message-passing backend.
pub struct ShmLogBackend {
    log_bytes: usize,
    timeout: Duration,
    endpoint: Option<Endpoint>,
    log: Option<BroadcastLog>,
    cursor: Option<LogCursor>,
    sends: u64,
}

impl ShmLogBackend {
    pub fn new(log_bytes: usize, timeout: Duration) -> Self {
        Self {
            log_bytes,
            timeout,
            endpoint: None,
            log: None,
            cursor: None,
            sends: 0,
        }
    }
}

impl Backend for ShmLogBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn delivery(&self) -> Delivery {
        Delivery::MessagePassing(FanOut::Broadcast)
    }

    fn initialize(&mut self, endpoint: &Endpoint) -> Result<(), BackendError> {
        check_shm_available(NAME)?;

        // Distinct name from the `shm` slot so a stale slot never looks like a log.
        let name = format!("{}-log", endpoint.identity.as_str());
        let log = match endpoint.role {
            Role::Writer => SharedMemoryRegion::create(&name, self.log_bytes)
                .map_err(ShmError::from)
                .and_then(|region| BroadcastLog::create(region, endpoint.readers)),
            Role::Reader => SharedMemoryRegion::open(&name)
                .map_err(ShmError::from)
                .and_then(BroadcastLog::attach),
        }
        .map_err(|e| map_region_error(NAME, endpoint.identity.as_str(), "initialize", e))?;

        if let Some(index) = endpoint.reader_index() {
            let cursor = log
                .cursor(index)
                .map_err(|e| BackendError::io(NAME, "initialize", e))?;
            self.cursor = Some(cursor);
        }

        tracing::debug!(
            backend = NAME,
            name = %name,
            role = %endpoint.role,
            capacity = log.capacity(),
            "Attached broadcast log"
        );

        self.log = Some(log);
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn write(&mut self, dataset: &Dataset) -> Result<(), BackendError> {
        let endpoint = require_role(NAME, self.endpoint.as_ref(), Role::Writer, "write")?;
        let copies = endpoint.deliveries_per_write;
        let readers = endpoint.readers;

        let log = self
            .log
            .as_ref()
            .ok_or_else(|| BackendError::io(NAME, "write", "log not attached"))?;
        let bytes = dataset.seal()?;
        log.append(&bytes, copies, self.timeout)
            .map_err(|e| BackendError::io(NAME, "write", e))?;

        self.sends += self.delivery().sends_per_write(readers, copies);
        Ok(())
    }

    fn read(&mut self) -> Result<Dataset, BackendError> {
        require_role(NAME, self.endpoint.as_ref(), Role::Reader, "read")?;
        let (Some(log), Some(cursor)) = (self.log.as_ref(), self.cursor.as_mut()) else {
            return Err(BackendError::io(NAME, "read", "log not attached"));
        };

        let started = Instant::now();
        let mut pause = Duration::from_micros(5);
        loop {
            if let Some(bytes) = log
                .next(cursor)
                .map_err(|e| BackendError::io(NAME, "read", e))?
            {
                return Ok(Dataset::open(&bytes)?);
            }
            if started.elapsed() >= self.timeout {
                return Err(BackendError::io(NAME, "read", "receive timed out"));
            }
            std::thread::sleep(pause);
            pause = (pause * 2).min(Duration::from_millis(1));
        }
    }

    fn cleanup(&mut self) -> Result<(), BackendError> {
        self.cursor = None;
        self.endpoint = None;
        if self.log.take().is_some() {
            tracing::debug!(backend = NAME, "Released broadcast log");
        }
        Ok(())
    }

    fn sends(&self) -> u64 {
        self.sends
    }
}
