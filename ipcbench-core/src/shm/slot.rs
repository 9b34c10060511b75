// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Seqlock-versioned publish slot.
//!
//! One writer overwrites a single payload area; any number of readers copy it
//! out. The version counter is odd while a write is in progress and even once
//! it is stable. Version 0 means nothing was ever published.

use std::sync::atomic::{fence, AtomicU64, Ordering};

use super::{ShmError, SharedMemoryRegion};

/// Header size in bytes (version + length + checksum + capacity as u64).
const HEADER_SIZE: usize = 32;

#[repr(C)]
struct SlotHeader {
    version: AtomicU64,
    length: AtomicU64,
    checksum: AtomicU64,
    capacity: AtomicU64,
}

/// Outcome of a non-blocking read.
#[derive(Debug, PartialEq, Eq)]
pub enum SlotRead {
    /// Nothing was published yet.
    Empty,
    /// A write was in flight; try again.
    Busy,
    /// Stable payload copy.
    Ready(Vec<u8>),
}

/// Single-slot shared-storage area on top of a shared memory region.
pub struct PublishSlot {
    region: SharedMemoryRegion,
}

impl PublishSlot {
    /// Initialize a freshly created region as an empty slot.
    pub fn create(region: SharedMemoryRegion) -> Result<Self, ShmError> {
        let size = region.size();
        if size <= HEADER_SIZE {
            return Err(ShmError::InvalidState {
                reason: format!("Region too small: {} bytes", size),
            });
        }

        let slot = Self { region };
        let header = slot.header();
        header.length.store(0, Ordering::Relaxed);
        header.checksum.store(0, Ordering::Relaxed);
        header
            .capacity
            .store((size - HEADER_SIZE) as u64, Ordering::Relaxed);
        header.version.store(0, Ordering::Release);
        Ok(slot)
    }

    /// Attach to a slot initialized by another process.
    pub fn attach(region: SharedMemoryRegion) -> Result<Self, ShmError> {
        let size = region.size();
        if size <= HEADER_SIZE {
            return Err(ShmError::InvalidState {
                reason: format!("Region too small: {} bytes", size),
            });
        }

        let slot = Self { region };
        let capacity = slot.capacity();
        if capacity != size - HEADER_SIZE {
            return Err(ShmError::InvalidState {
                reason: format!(
                    "Header capacity {} does not match region size {}",
                    capacity, size
                ),
            });
        }
        Ok(slot)
    }

    fn header(&self) -> &SlotHeader {
        // SAFETY: the region is at least HEADER_SIZE bytes, page aligned, and the
        // header only consists of atomics.
        unsafe { &*(self.region.as_ptr() as *const SlotHeader) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: HEADER_SIZE is within the region bounds
        unsafe { self.region.as_ptr().add(HEADER_SIZE) }
    }

    /// Usable payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.header().capacity.load(Ordering::Acquire) as usize
    }

    /// Overwrite the slot. Single writer only.
    pub fn publish(&self, payload: &[u8]) -> Result<u64, ShmError> {
        let capacity = self.capacity();
        if payload.len() > capacity {
            return Err(ShmError::TooLarge {
                size: payload.len(),
                capacity,
            });
        }

        let header = self.header();
        let start = header.version.load(Ordering::Relaxed);

        header.version.store(start + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: payload fits in the data area; the odd version keeps readers out
        unsafe {
            std::ptr::copy_nonoverlapping(payload.as_ptr(), self.data_ptr(), payload.len());
        }
        header
            .length
            .store(payload.len() as u64, Ordering::Relaxed);
        header
            .checksum
            .store(crc32fast::hash(payload) as u64, Ordering::Relaxed);

        let published = start + 2;
        header.version.store(published, Ordering::Release);
        Ok(published)
    }

    /// Copy out the current payload without blocking.
    pub fn read(&self) -> Result<SlotRead, ShmError> {
        let header = self.header();

        let before = header.version.load(Ordering::Acquire);
        if before == 0 {
            return Ok(SlotRead::Empty);
        }
        if before % 2 == 1 {
            return Ok(SlotRead::Busy);
        }

        let length = header.length.load(Ordering::Relaxed) as usize;
        let expected = header.checksum.load(Ordering::Relaxed) as u32;
        if length > self.capacity() {
            return Ok(SlotRead::Busy);
        }

        let mut payload = vec![0u8; length];
        // SAFETY: length is bounded by capacity; a concurrent write is detected below
        unsafe {
            std::ptr::copy_nonoverlapping(self.data_ptr(), payload.as_mut_ptr(), length);
        }

        fence(Ordering::Acquire);
        if header.version.load(Ordering::Relaxed) != before {
            return Ok(SlotRead::Busy);
        }

        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(ShmError::ChecksumMismatch { expected, actual });
        }

        Ok(SlotRead::Ready(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(name: &str, size: usize) -> SharedMemoryRegion {
        let name = format!("ipcbench-slot-{}-{}", name, std::process::id());
        SharedMemoryRegion::create(&name, size).unwrap()
    }

    #[test]
    fn test_empty_then_publish() {
        let slot = PublishSlot::create(region("empty", 4096)).unwrap();
        assert_eq!(slot.read().unwrap(), SlotRead::Empty);

        assert_eq!(slot.publish(b"first").unwrap(), 2);
        assert_eq!(slot.read().unwrap(), SlotRead::Ready(b"first".to_vec()));

        // overwrite is last-write-wins, even with a shorter payload
        assert_eq!(slot.publish(b"2nd").unwrap(), 4);
        assert_eq!(slot.read().unwrap(), SlotRead::Ready(b"2nd".to_vec()));
    }

    #[test]
    fn test_payload_too_large() {
        let slot = PublishSlot::create(region("large", 4096)).unwrap();
        let payload = vec![7u8; 4096];
        assert!(matches!(
            slot.publish(&payload),
            Err(ShmError::TooLarge { size: 4096, .. })
        ));
    }

    #[test]
    fn test_attach_sees_published_data() {
        let owner = region("attach", 8192);
        let name = owner.name().to_string();
        let writer = PublishSlot::create(owner).unwrap();
        writer.publish(b"visible").unwrap();

        let reader = PublishSlot::attach(SharedMemoryRegion::open(&name).unwrap()).unwrap();
        assert_eq!(reader.capacity(), 8192 - HEADER_SIZE);
        assert_eq!(reader.read().unwrap(), SlotRead::Ready(b"visible".to_vec()));
    }
}
