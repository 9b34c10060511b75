// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Single-producer, multi-consumer broadcast log in shared memory.
//!
//! A circular buffer like the classic SPSC ring, except that each reader owns
//! its own tail. An append is visible to every reader at once, and space is
//! reclaimed only after the slowest reader moved past it. Each entry carries a
//! copy count so one append can stand for several deliveries of the same payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{align_up, SharedMemoryRegion, ShmError};

/// Maximum number of reader tails in the header.
pub const MAX_READERS: usize = 64;

/// Fixed header fields (head + capacity + readers + reserved as u64).
const FIXED_HEADER_SIZE: usize = 32;

/// Header size in bytes including the per-reader tail table.
const HEADER_SIZE: usize = FIXED_HEADER_SIZE + MAX_READERS * 8;

/// Alignment for entries. Entry headers never straddle the wrap point.
const ENTRY_ALIGNMENT: usize = 16;

#[repr(C)]
struct LogHeader {
    /// Write position (owned by the producer).
    head: AtomicU64,
    /// Data area size in bytes.
    capacity: AtomicU64,
    /// Number of registered readers.
    readers: AtomicU64,
    _reserved: AtomicU64,
    /// Read position of each reader.
    tails: [AtomicU64; MAX_READERS],
}

/// Entry header for each appended payload.
#[repr(C)]
#[derive(Clone, Copy)]
struct EntryHeader {
    length: u32,
    checksum: u32,
    copies: u32,
    _reserved: u32,
}

const ENTRY_HEADER_SIZE: usize = std::mem::size_of::<EntryHeader>();

/// Reader-local position in the log.
#[derive(Debug, Clone)]
pub struct LogCursor {
    reader: usize,
    position: u64,
    /// Copies of the current entry still to hand out.
    remaining: u32,
}

/// Broadcast log over a shared memory region.
pub struct BroadcastLog {
    region: SharedMemoryRegion,
}

impl BroadcastLog {
    /// Initialize a freshly created region for `readers` consumers.
    pub fn create(region: SharedMemoryRegion, readers: usize) -> Result<Self, ShmError> {
        if readers == 0 || readers > MAX_READERS {
            return Err(ShmError::InvalidState {
                reason: format!("Reader count {} outside [1, {}]", readers, MAX_READERS),
            });
        }

        let size = region.size();
        let capacity = (size.saturating_sub(HEADER_SIZE)) & !(ENTRY_ALIGNMENT - 1);
        if capacity < ENTRY_ALIGNMENT * 4 {
            return Err(ShmError::InvalidState {
                reason: format!("Region too small: {} bytes", size),
            });
        }

        let log = Self { region };
        let header = log.header();
        for tail in header.tails.iter() {
            tail.store(0, Ordering::Relaxed);
        }
        header.capacity.store(capacity as u64, Ordering::Relaxed);
        header.readers.store(readers as u64, Ordering::Relaxed);
        header.head.store(0, Ordering::Release);
        Ok(log)
    }

    /// Attach to a log created by another process.
    pub fn attach(region: SharedMemoryRegion) -> Result<Self, ShmError> {
        if region.size() <= HEADER_SIZE {
            return Err(ShmError::InvalidState {
                reason: format!("Region too small: {} bytes", region.size()),
            });
        }

        let log = Self { region };
        let capacity = log.capacity();
        if capacity == 0 || capacity > log.region.size() - HEADER_SIZE {
            return Err(ShmError::InvalidState {
                reason: format!("Corrupt capacity {} in log header", capacity),
            });
        }
        Ok(log)
    }

    fn header(&self) -> &LogHeader {
        // SAFETY: the region is larger than HEADER_SIZE, page aligned, and the
        // header only consists of atomics.
        unsafe { &*(self.region.as_ptr() as *const LogHeader) }
    }

    fn data_ptr(&self) -> *mut u8 {
        // SAFETY: HEADER_SIZE is within the region bounds
        unsafe { self.region.as_ptr().add(HEADER_SIZE) }
    }

    /// Data area size in bytes.
    pub fn capacity(&self) -> usize {
        self.header().capacity.load(Ordering::Acquire) as usize
    }

    pub fn readers(&self) -> usize {
        self.header().readers.load(Ordering::Acquire) as usize
    }

    fn head(&self) -> u64 {
        self.header().head.load(Ordering::Acquire)
    }

    fn slowest_tail(&self) -> u64 {
        let header = self.header();
        header.tails[..self.readers()]
            .iter()
            .map(|t| t.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Bytes the producer may append right now.
    pub fn available_space(&self) -> usize {
        let used = self.head() - self.slowest_tail();
        self.capacity() - used as usize
    }

    /// Append `payload` as one entry worth `copies` deliveries.
    ///
    /// Blocks while the slowest reader holds the space, up to `timeout`.
    pub fn append(&self, payload: &[u8], copies: u32, timeout: Duration) -> Result<(), ShmError> {
        let capacity = self.capacity();
        let entry_size = align_up(ENTRY_HEADER_SIZE + payload.len(), ENTRY_ALIGNMENT);
        if entry_size > capacity || payload.len() > u32::MAX as usize {
            return Err(ShmError::TooLarge {
                size: payload.len(),
                capacity,
            });
        }

        let started = Instant::now();
        let mut pause = Duration::from_micros(20);
        while self.available_space() < entry_size {
            if started.elapsed() >= timeout {
                return Err(ShmError::Full {
                    size: payload.len(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(pause);
            pause = (pause * 2).min(Duration::from_millis(1));
        }

        let entry = EntryHeader {
            length: payload.len() as u32,
            checksum: crc32fast::hash(payload),
            copies: copies.max(1),
            _reserved: 0,
        };

        let head = self.head();
        let offset = (head as usize) % capacity;

        // SAFETY: space was reserved above; offset is ENTRY_ALIGNMENT aligned and
        // capacity a multiple of it, so the entry header is contiguous.
        unsafe {
            std::ptr::write_unaligned(self.data_ptr().add(offset) as *mut EntryHeader, entry);
            self.copy_in((offset + ENTRY_HEADER_SIZE) % capacity, payload);
        }

        self.header()
            .head
            .store(head + entry_size as u64, Ordering::Release);
        Ok(())
    }

    /// Cursor for reader `index` (0-based), starting at its published tail.
    pub fn cursor(&self, index: usize) -> Result<LogCursor, ShmError> {
        if index >= self.readers() {
            return Err(ShmError::InvalidState {
                reason: format!("Reader index {} >= {}", index, self.readers()),
            });
        }
        Ok(LogCursor {
            reader: index,
            position: self.header().tails[index].load(Ordering::Acquire),
            remaining: 0,
        })
    }

    /// Take the next delivery for `cursor`, or `None` if it is caught up.
    pub fn next(&self, cursor: &mut LogCursor) -> Result<Option<Vec<u8>>, ShmError> {
        if cursor.position >= self.head() {
            return Ok(None);
        }

        let capacity = self.capacity();
        let offset = (cursor.position as usize) % capacity;

        // SAFETY: position < head, so a complete entry was released at offset
        let entry: EntryHeader =
            unsafe { std::ptr::read_unaligned(self.data_ptr().add(offset) as *const EntryHeader) };

        let length = entry.length as usize;
        let entry_size = align_up(ENTRY_HEADER_SIZE + length, ENTRY_ALIGNMENT);
        if entry_size > capacity || entry.copies == 0 {
            return Err(ShmError::InvalidState {
                reason: format!("Corrupt entry at position {}", cursor.position),
            });
        }

        let mut payload = vec![0u8; length];
        // SAFETY: length was validated against capacity
        unsafe {
            self.copy_out((offset + ENTRY_HEADER_SIZE) % capacity, &mut payload);
        }

        // Validate checksum - FAIL IMMEDIATELY on mismatch (no fallback)
        let actual = crc32fast::hash(&payload);
        if actual != entry.checksum {
            return Err(ShmError::ChecksumMismatch {
                expected: entry.checksum,
                actual,
            });
        }

        if cursor.remaining == 0 {
            cursor.remaining = entry.copies;
        }
        cursor.remaining -= 1;
        if cursor.remaining == 0 {
            cursor.position += entry_size as u64;
            self.header().tails[cursor.reader].store(cursor.position, Ordering::Release);
        }

        Ok(Some(payload))
    }

    /// Copy `bytes` into the data area starting at `offset`, wrapping at capacity.
    unsafe fn copy_in(&self, offset: usize, bytes: &[u8]) {
        let capacity = self.capacity();
        let first = bytes.len().min(capacity - offset);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr().add(offset), first);
        if first < bytes.len() {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr().add(first),
                self.data_ptr(),
                bytes.len() - first,
            );
        }
    }

    /// Copy out of the data area starting at `offset`, wrapping at capacity.
    unsafe fn copy_out(&self, offset: usize, out: &mut [u8]) {
        let capacity = self.capacity();
        let first = out.len().min(capacity - offset);
        std::ptr::copy_nonoverlapping(self.data_ptr().add(offset), out.as_mut_ptr(), first);
        if first < out.len() {
            let rest = out.len() - first;
            std::ptr::copy_nonoverlapping(self.data_ptr(), out.as_mut_ptr().add(first), rest);
        }
    }
}
