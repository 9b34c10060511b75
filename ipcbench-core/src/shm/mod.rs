// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared memory primitives used by the `shm` and `shm-log` backends.
//!
//! This module provides:
//! - SharedMemoryRegion: POSIX shm_open/mmap wrapper
//! - PublishSlot: single seqlock-versioned slot, last write wins
//! - BroadcastLog: single-writer, multi-reader log with per-reader cursors

mod log;
mod region;
mod slot;

pub use log::{BroadcastLog, LogCursor};
pub use region::{RegionError, SharedMemoryRegion};
pub use slot::{PublishSlot, SlotRead};

use thiserror::Error;

/// Errors from the shared-memory data structures.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error(transparent)]
    Region(#[from] RegionError),

    #[error("Payload of {size} bytes exceeds capacity {capacity}")]
    TooLarge { size: usize, capacity: usize },

    #[error("No room for {size} bytes after waiting {waited_ms}ms (slowest reader stalled)")]
    Full { size: usize, waited_ms: u64 },

    #[error("Invalid buffer state: {reason}")]
    InvalidState { reason: String },

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Align value up to the given power-of-two alignment.
pub(crate) const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
