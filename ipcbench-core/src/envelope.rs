// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Pandey

//! Versioned serialization envelope.
//!
//! Every payload that crosses a process boundary is wrapped as
//! `magic | schema | reserved | length | crc32 | payload`, all little-endian.
//! Readers validate magic, schema and checksum before decoding, so equality
//! is checked on decoded structure, never on identity.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::EnvelopeError;

/// Envelope magic bytes.
pub const MAGIC: [u8; 4] = *b"IPCB";

/// Schema of the payload carried by this build.
pub const SCHEMA_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (512 MB).
pub const MAX_PAYLOAD_SIZE: usize = 512 * 1024 * 1024;

/// Parsed envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub schema: u16,
    pub length: u32,
    pub checksum: u32,
}

impl EnvelopeHeader {
    /// Parse and validate the fixed-size header.
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(EnvelopeError::Truncated { len: bytes.len() });
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != MAGIC {
            return Err(EnvelopeError::BadMagic { found: magic });
        }

        let schema = u16::from_le_bytes([bytes[4], bytes[5]]);
        if schema != SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedSchema {
                found: schema,
                expected: SCHEMA_VERSION,
            });
        }

        let length = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let checksum = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

        Ok(Self {
            schema,
            length,
            checksum,
        })
    }

    /// Total envelope size including the header.
    pub fn total_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// Serialize `value` and wrap it in an envelope.
pub fn seal<T: Serialize>(value: &T) -> Result<Vec<u8>, EnvelopeError> {
    let payload = serde_json::to_vec(value).map_err(|e| EnvelopeError::Encode {
        reason: e.to_string(),
    })?;

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(EnvelopeError::Encode {
            reason: format!(
                "payload of {} bytes exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            ),
        });
    }

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Validate an envelope and decode its payload.
///
/// Fails immediately on checksum mismatch.
pub fn open<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EnvelopeError> {
    let header = EnvelopeHeader::parse(bytes)?;

    if bytes.len() < header.total_len() {
        return Err(EnvelopeError::Truncated { len: bytes.len() });
    }

    let payload = &bytes[HEADER_SIZE..header.total_len()];
    let actual = crc32fast::hash(payload);
    if actual != header.checksum {
        return Err(EnvelopeError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    serde_json::from_slice(payload).map_err(|e| EnvelopeError::Decode {
        reason: e.to_string(),
    })
}
