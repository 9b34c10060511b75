// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates run settings before any process touches a backend.
//! Any invalid field results in a ConfigurationError that prevents startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BenchError, BenchResult, ConfigurationError};
use crate::types::ScenarioKind;

/// Raw run section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawRunSection {
    #[serde(default = "default_output_dir")]
    output_dir: String,
    #[serde(default)]
    resource_dir: Option<String>,
    #[serde(default = "default_resource_prefix")]
    resource_prefix: String,
    #[serde(default = "default_verify_reads")]
    verify_reads: bool,
}

fn default_output_dir() -> String {
    "results".to_string()
}

fn default_resource_prefix() -> String {
    "ipcbench".to_string()
}

fn default_verify_reads() -> bool {
    true
}

impl Default for RawRunSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            resource_dir: None,
            resource_prefix: default_resource_prefix(),
            verify_reads: default_verify_reads(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCoordinationSection {
    #[serde(default)]
    barrier_timeout_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

impl Default for RawCoordinationSection {
    fn default() -> Self {
        Self {
            barrier_timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRetrySection {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_initial_backoff_us")]
    initial_backoff_us: u64,
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    20
}

fn default_initial_backoff_us() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    100
}

impl Default for RawRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_us: default_initial_backoff_us(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBackendSection {
    #[serde(default = "default_shm_slot_bytes")]
    shm_slot_bytes: usize,
    #[serde(default = "default_shm_log_bytes")]
    shm_log_bytes: usize,
    #[serde(default = "default_recv_timeout_ms")]
    recv_timeout_ms: u64,
}

fn default_shm_slot_bytes() -> usize {
    64 * 1024 * 1024 // 64MB
}

fn default_shm_log_bytes() -> usize {
    256 * 1024 * 1024 // 256MB
}

fn default_recv_timeout_ms() -> u64 {
    30_000
}

impl Default for RawBackendSection {
    fn default() -> Self {
        Self {
            shm_slot_bytes: default_shm_slot_bytes(),
            shm_log_bytes: default_shm_log_bytes(),
            recv_timeout_ms: default_recv_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMatrixSection {
    #[serde(default = "default_backends")]
    backends: Vec<String>,
    #[serde(default = "default_scenarios")]
    scenarios: String,
    #[serde(default = "default_data_sizes")]
    data_sizes: Vec<usize>,
    #[serde(default = "default_iterations")]
    iterations: u64,
}

fn default_backends() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_scenarios() -> String {
    "both".to_string()
}

fn default_data_sizes() -> Vec<usize> {
    vec![10_000]
}

fn default_iterations() -> u64 {
    100
}

impl Default for RawMatrixSection {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            scenarios: default_scenarios(),
            data_sizes: default_data_sizes(),
            iterations: default_iterations(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    run: RawRunSection,
    #[serde(default)]
    coordination: RawCoordinationSection,
    #[serde(default)]
    retry: RawRetrySection,
    #[serde(default)]
    backends: RawBackendSection,
    #[serde(default)]
    matrix: RawMatrixSection,
}

/// Bounded exponential backoff for shared-storage reads that are not ready yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: Duration::from_micros(default_initial_backoff_us()),
            max_backoff: Duration::from_millis(default_max_backoff_ms()),
        }
    }
}

/// Settings handed to backend constructors.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Directory for file-system resources (file store, socket files).
    pub resource_dir: PathBuf,
    pub shm_slot_bytes: usize,
    pub shm_log_bytes: usize,
    /// Upper bound on a blocking message-passing receive.
    pub recv_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            resource_dir: std::env::temp_dir().join("ipcbench"),
            shm_slot_bytes: default_shm_slot_bytes(),
            shm_log_bytes: default_shm_log_bytes(),
            recv_timeout: Duration::from_millis(default_recv_timeout_ms()),
        }
    }
}

/// Coordination settings.
#[derive(Debug, Clone, Copy)]
pub struct CoordinationSettings {
    /// `None` waits forever: a stuck participant stalls the group.
    pub barrier_timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl Default for CoordinationSettings {
    fn default() -> Self {
        Self {
            barrier_timeout: None,
            connect_timeout: Duration::from_millis(default_connect_timeout_ms()),
        }
    }
}

/// Matrix defaults; the CLI may override each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixDefaults {
    pub backends: Vec<String>,
    pub scenarios: Vec<ScenarioKind>,
    pub data_sizes: Vec<usize>,
    pub iterations: u64,
}

impl Default for MatrixDefaults {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            scenarios: ScenarioKind::ALL.to_vec(),
            data_sizes: default_data_sizes(),
            iterations: default_iterations(),
        }
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub output_dir: PathBuf,
    pub resource_prefix: String,
    pub verify_reads: bool,
    pub coordination: CoordinationSettings,
    pub retry: RetryPolicy,
    pub backends: BackendSettings,
    pub matrix: MatrixDefaults,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> BenchResult<RunConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigurationError::ConfigNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| BenchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Ok(Self::load_string(&content)?)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> Result<RunConfig, ConfigurationError> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Self::validate(RawConfig::default());
        }

        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigurationError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Validated defaults, as if an empty file had been loaded.
    pub fn defaults() -> Result<RunConfig, ConfigurationError> {
        Self::validate(RawConfig::default())
    }

    fn validate(raw: RawConfig) -> Result<RunConfig, ConfigurationError> {
        let retry = Self::validate_retry(raw.retry)?;
        let backends = Self::validate_backends(raw.backends, raw.run.resource_dir.as_deref())?;
        let coordination = Self::validate_coordination(raw.coordination)?;
        let matrix = Self::validate_matrix(raw.matrix)?;

        if raw.run.resource_prefix.is_empty()
            || !raw
                .run
                .resource_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "resource_prefix",
                value: raw.run.resource_prefix,
                reason: "Must be non-empty ASCII alphanumerics, hyphens, and underscores"
                    .to_string(),
            });
        }

        Ok(RunConfig {
            output_dir: PathBuf::from(raw.run.output_dir),
            resource_prefix: raw.run.resource_prefix,
            verify_reads: raw.run.verify_reads,
            coordination,
            retry,
            backends,
            matrix,
        })
    }

    fn validate_retry(raw: RawRetrySection) -> Result<RetryPolicy, ConfigurationError> {
        if raw.max_attempts == 0 {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "max_attempts",
                value: "0".to_string(),
                reason: "At least one read attempt is required".to_string(),
            });
        }

        let initial_backoff = Duration::from_micros(raw.initial_backoff_us);
        let max_backoff = Duration::from_millis(raw.max_backoff_ms);
        if initial_backoff > max_backoff {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "initial_backoff_us",
                value: raw.initial_backoff_us.to_string(),
                reason: format!("Must not exceed max_backoff_ms ({}ms)", raw.max_backoff_ms),
            });
        }

        Ok(RetryPolicy {
            max_attempts: raw.max_attempts,
            initial_backoff,
            max_backoff,
        })
    }

    fn validate_backends(
        raw: RawBackendSection,
        resource_dir: Option<&str>,
    ) -> Result<BackendSettings, ConfigurationError> {
        // Bounds of a single POSIX shm mapping
        const MIN_SHM_SIZE: usize = 64 * 1024;
        const MAX_SHM_SIZE: usize = 1024 * 1024 * 1024;

        for (field, value) in [
            ("shm_slot_bytes", raw.shm_slot_bytes),
            ("shm_log_bytes", raw.shm_log_bytes),
        ] {
            if !(MIN_SHM_SIZE..=MAX_SHM_SIZE).contains(&value) {
                return Err(ConfigurationError::InvalidFieldValue {
                    field,
                    value: value.to_string(),
                    reason: format!("Must be between {} and {} bytes", MIN_SHM_SIZE, MAX_SHM_SIZE),
                });
            }
        }

        if raw.recv_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "recv_timeout_ms",
                value: "0".to_string(),
                reason: "Receive timeout must be greater than 0".to_string(),
            });
        }

        let resource_dir = match resource_dir {
            Some(dir) if dir.is_empty() => {
                return Err(ConfigurationError::InvalidFieldValue {
                    field: "resource_dir",
                    value: String::new(),
                    reason: "Resource directory cannot be empty".to_string(),
                })
            }
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("ipcbench"),
        };

        Ok(BackendSettings {
            resource_dir,
            shm_slot_bytes: raw.shm_slot_bytes,
            shm_log_bytes: raw.shm_log_bytes,
            recv_timeout: Duration::from_millis(raw.recv_timeout_ms),
        })
    }

    fn validate_coordination(
        raw: RawCoordinationSection,
    ) -> Result<CoordinationSettings, ConfigurationError> {
        if raw.barrier_timeout_ms == Some(0) {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "barrier_timeout_ms",
                value: "0".to_string(),
                reason: "Omit the field to wait forever; 0 would fail every barrier".to_string(),
            });
        }

        if raw.connect_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "connect_timeout_ms",
                value: "0".to_string(),
                reason: "Connect timeout must be greater than 0".to_string(),
            });
        }

        Ok(CoordinationSettings {
            barrier_timeout: raw.barrier_timeout_ms.map(Duration::from_millis),
            connect_timeout: Duration::from_millis(raw.connect_timeout_ms),
        })
    }

    fn validate_matrix(raw: RawMatrixSection) -> Result<MatrixDefaults, ConfigurationError> {
        if raw.backends.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "backends",
                value: "[]".to_string(),
                reason: "At least one backend (or 'all') must be listed".to_string(),
            });
        }

        if raw.data_sizes.is_empty() || raw.data_sizes.contains(&0) {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "data_sizes",
                value: format!("{:?}", raw.data_sizes),
                reason: "Need at least one data size, each greater than 0".to_string(),
            });
        }

        Ok(MatrixDefaults {
            backends: raw.backends,
            scenarios: ScenarioKind::parse_selection(&raw.scenarios)?,
            data_sizes: raw.data_sizes,
            iterations: raw.iterations,
        })
    }
}
