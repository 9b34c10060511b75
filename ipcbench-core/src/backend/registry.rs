//! Backend registry: name to constructor.
//!
//! Registration order is preserved, so `all` expands deterministically and every
//! process of a run walks the matrix in the same order.

use super::{Backend, FileBackend, ShmBackend, ShmLogBackend, SocketBackend};
use crate::config::BackendSettings;
use crate::error::ConfigurationError;

/// Constructor for a fresh backend instance.
pub type BackendFactory = Box<dyn Fn(&BackendSettings) -> Box<dyn Backend> + Send + Sync>;

/// Selector expanding to every registered backend.
pub const ALL_BACKENDS: &str = "all";

/// Ordered registry of backend constructors.
pub struct BackendRegistry {
    factories: Vec<(String, BackendFactory)>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
        }
    }

    /// Registry with every bundled backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [(&str, BackendFactory); 4] = [
            (
                "shm",
                Box::new(|s: &BackendSettings| {
                    Box::new(ShmBackend::new(s.shm_slot_bytes)) as Box<dyn Backend>
                }),
            ),
            (
                "file",
                Box::new(|s: &BackendSettings| {
                    Box::new(FileBackend::new(s.resource_dir.clone())) as Box<dyn Backend>
                }),
            ),
            (
                "socket",
                Box::new(|s: &BackendSettings| {
                    Box::new(SocketBackend::new(s.resource_dir.clone(), s.recv_timeout))
                        as Box<dyn Backend>
                }),
            ),
            (
                "shm-log",
                Box::new(|s: &BackendSettings| {
                    Box::new(ShmLogBackend::new(s.shm_log_bytes, s.recv_timeout))
                        as Box<dyn Backend>
                }),
            ),
        ];

        for (name, factory) in defaults {
            registry.factories.push((name.to_string(), factory));
        }
        registry
    }

    /// Register a constructor. Names must be unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: BackendFactory,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();

        if name.is_empty() || name == ALL_BACKENDS {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "backend",
                value: name,
                reason: "Reserved or empty backend name".to_string(),
            });
        }

        // Check for duplicate - fail fast
        if self.contains(&name) {
            return Err(ConfigurationError::DuplicateBackend { name });
        }

        self.factories.push((name, factory));
        Ok(())
    }

    /// Construct a fresh instance of `name`.
    pub fn create(
        &self,
        name: &str,
        settings: &BackendSettings,
    ) -> Result<Box<dyn Backend>, ConfigurationError> {
        self.factories
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory(settings))
            .ok_or_else(|| ConfigurationError::UnknownBackend {
                name: name.to_string(),
            })
    }

    /// Check if a backend is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|(n, _)| n == name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Expand a selection (`all` or explicit names) into registered names.
    ///
    /// Order follows the selection, `all` in registration order; duplicates are dropped.
    pub fn resolve(&self, selection: &[String]) -> Result<Vec<String>, ConfigurationError> {
        let mut resolved: Vec<String> = Vec::new();

        for item in selection {
            if item.eq_ignore_ascii_case(ALL_BACKENDS) {
                for name in self.names() {
                    if !resolved.iter().any(|r| r == name) {
                        resolved.push(name.to_string());
                    }
                }
            } else if self.contains(item) {
                if !resolved.contains(item) {
                    resolved.push(item.clone());
                }
            } else {
                return Err(ConfigurationError::UnknownBackend { name: item.clone() });
            }
        }

        if resolved.is_empty() {
            return Err(ConfigurationError::InvalidFieldValue {
                field: "backend",
                value: String::new(),
                reason: "No backend selected".to_string(),
            });
        }
        Ok(resolved)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
