// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Deterministic synthetic payloads.
//!
//! A dataset is a sequence of keyed nested records. It is derived purely from
//! a seed, so every process of a run can regenerate the dataset a writer
//! published and compare it structurally after decoding.

use serde::{Deserialize, Serialize};

use crate::envelope;
use crate::error::EnvelopeError;
use crate::types::BenchmarkCell;

/// Nested value of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub value: i64,
    pub squared: i64,
    pub text: String,
    pub ratio: f64,
}

/// One keyed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub record: Record,
}

/// Immutable synthetic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    seed: u64,
    entries: Vec<Entry>,
}

impl Dataset {
    /// Generate `size` entries from `seed`.
    pub fn generate(seed: u64, size: usize) -> Self {
        let mut state = seed;
        let base = (splitmix64(&mut state) % 1_000_000) as i64;

        let entries = (0..size)
            .map(|i| {
                let value = base + i as i64;
                Entry {
                    key: format!("key_{}", i),
                    record: Record {
                        value,
                        squared: value * value,
                        text: format!("value_{}_{:016x}", value, splitmix64(&mut state)),
                        ratio: value as f64 / 3.0,
                    },
                }
            })
            .collect();

        Self { seed, entries }
    }

    /// The dataset a writer publishes once for a Shared cell.
    pub fn for_cell(cell: &BenchmarkCell) -> Self {
        Self::generate(cell.seed(), cell.data_size())
    }

    /// The fresh dataset of one Streaming iteration.
    pub fn for_iteration(cell: &BenchmarkCell, iteration: u64) -> Self {
        let mut state = cell.seed() ^ iteration.wrapping_add(1).wrapping_mul(0xA24B_AED4_963E_E407);
        Self::generate(splitmix64(&mut state), cell.data_size())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wrap into a versioned envelope.
    pub fn seal(&self) -> Result<Vec<u8>, EnvelopeError> {
        envelope::seal(self)
    }

    /// Decode from a versioned envelope.
    pub fn open(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        envelope::open(bytes)
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScenarioKind;

    #[test]
    fn test_generation_is_reproducible() {
        let a = Dataset::generate(42, 100);
        let b = Dataset::generate(42, 100);
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
        assert_eq!(a.entries()[7].key, "key_7");
        let r = &a.entries()[7].record;
        assert_eq!(r.squared, r.value * r.value);
    }

    #[test]
    fn test_seeds_differ() {
        assert_ne!(Dataset::generate(1, 10), Dataset::generate(2, 10));
    }

    #[test]
    fn test_iterations_are_distinct() {
        let cell = BenchmarkCell::new("shm", ScenarioKind::Streaming, 10, 3).unwrap();
        let first = Dataset::for_iteration(&cell, 0);
        let second = Dataset::for_iteration(&cell, 1);
        assert_ne!(first, second);
        assert_eq!(first, Dataset::for_iteration(&cell, 0));
        assert_ne!(first, Dataset::for_cell(&cell));
    }

    #[test]
    fn test_envelope_preserves_structure() {
        let data = Dataset::generate(7, 1000);
        let bytes = data.seal().unwrap();
        assert_eq!(Dataset::open(&bytes).unwrap(), data);
    }
}
