// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for ipcbench.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.
//!
//! Errors fall into two scopes. Cell-scoped errors ([`BackendError`]) are caught
//! by the driver and recorded as a failed cell. Run-scoped errors
//! ([`ConfigurationError`], [`CoordinationError`]) abort the whole process group.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for a benchmark run.
#[derive(Debug, Error)]
pub enum BenchError {
    // =========================================================================
    // Configuration Errors - Fatal before any cell runs
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    // =========================================================================
    // Coordination Errors - Fatal to the whole run
    // =========================================================================
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    // =========================================================================
    // Backend Errors - Confined to one cell
    // =========================================================================
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl BenchError {
    /// Whether this error must abort the whole process group.
    pub fn is_run_scoped(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Coordination(_))
    }
}

/// Invalid run setup. Raised before any cell executes.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Need at least 2 processes (1 writer + 1 reader), got {size}")]
    InsufficientProcesses { size: usize },

    #[error("A run needs at least one reader")]
    NoReaders,

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unknown backend: {name}")]
    UnknownBackend { name: String },

    #[error("Backend registered twice: {name}")]
    DuplicateBackend { name: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("Missing or malformed environment variable {var}: {reason}")]
    MissingEnvironment { var: &'static str, reason: String },
}

/// Failures of a backend operation. Always confined to the current cell.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend {backend} unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend {backend}: resource {identity} is already bound (stale run?)")]
    ResourceConflict { backend: String, identity: String },

    /// Nothing published yet. Shared-storage backends only; retried by the caller.
    #[error("No data published yet")]
    NotReady,

    #[error("Read still not ready after {attempts} attempts")]
    ReadNotReady { attempts: u32 },

    #[error("Backend {backend} {operation} failed: {reason}")]
    Io {
        backend: String,
        operation: &'static str,
        reason: String,
    },

    #[error("Backend {backend}: {operation} is not permitted for role {role}")]
    RoleViolation {
        backend: String,
        operation: &'static str,
        role: &'static str,
    },

    #[error("Read {read} of iteration {iteration} does not match the published dataset")]
    Mismatch { iteration: u64, read: u64 },

    #[error("Payload decode failed: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl BackendError {
    /// Build an [`BackendError::Io`] from any displayable cause.
    pub fn io(backend: &str, operation: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Io {
            backend: backend.to_string(),
            operation,
            reason: reason.to_string(),
        }
    }

    /// Classify into the reported failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable { .. } => FailureKind::BackendUnavailable,
            Self::NotReady | Self::ReadNotReady { .. } => FailureKind::BackendReadNotReady,
            Self::ResourceConflict { .. }
            | Self::Io { .. }
            | Self::RoleViolation { .. }
            | Self::Mismatch { .. }
            | Self::Envelope(_) => FailureKind::BackendIoError,
        }
    }
}

/// Failure taxonomy as it appears in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    BackendUnavailable,
    BackendReadNotReady,
    #[serde(rename = "BackendIOError")]
    BackendIoError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BackendUnavailable => write!(f, "BackendUnavailable"),
            Self::BackendReadNotReady => write!(f, "BackendReadNotReady"),
            Self::BackendIoError => write!(f, "BackendIOError"),
        }
    }
}

/// Processes disagree or cannot rendezvous. No safe continuation exists.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Rank {rank} arrived at barrier '{actual}' but the group is at '{expected}'")]
    Diverged {
        rank: usize,
        expected: String,
        actual: String,
    },

    #[error("Barrier '{tag}' not reached by all participants within {waited_ms}ms")]
    Timeout { tag: String, waited_ms: u64 },

    #[error("Lost connection to rank {rank}: {reason}")]
    Disconnected { rank: usize, reason: String },

    #[error("Group aborted: {reason}")]
    Aborted { reason: String },

    #[error("Coordination protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("Coordinator at {path} unreachable: {reason}")]
    Unreachable { path: PathBuf, reason: String },
}

/// Versioned payload envelope errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Envelope truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("Bad envelope magic: {found:02x?}")]
    BadMagic { found: [u8; 4] },

    #[error("Unsupported schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u16, expected: u16 },

    #[error("Payload checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Payload encode failed: {reason}")]
    Encode { reason: String },

    #[error("Payload decode failed: {reason}")]
    Decode { reason: String },
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;
