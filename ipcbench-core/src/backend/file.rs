// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `file` backend: the envelope lives in a file under the resource directory.
//!
//! The writer owns `{resource_dir}/{identity}/` for the cell. Publishing writes a
//! temporary file and renames it over `data.env`, so readers see either the old
//! or the new payload, never a torn one.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{require_role, Backend, Delivery, Endpoint};
use crate::dataset::Dataset;
use crate::error::BackendError;
use crate::types::Role;

const NAME: &str = "file";
const DATA_FILE: &str = "data.env";
const STAGING_FILE: &str = "data.env.tmp";

/// Shared-storage backend over a plain file.
pub struct FileBackend {
    resource_dir: PathBuf,
    endpoint: Option<Endpoint>,
    dir: Option<PathBuf>,
    sends: u64,
}

impl FileBackend {
    pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            endpoint: None,
            dir: None,
            sends: 0,
        }
    }

    fn dir(&self, operation: &'static str) -> Result<&PathBuf, BackendError> {
        self.dir
            .as_ref()
            .ok_or_else(|| BackendError::io(NAME, operation, "store not attached"))
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn delivery(&self) -> Delivery {
        Delivery::SharedStorage
    }

    fn initialize(&mut self, endpoint: &Endpoint) -> Result<(), BackendError> {
        let dir = self.resource_dir.join(endpoint.identity.as_str());

        match endpoint.role {
            Role::Writer => {
                fs::create_dir_all(&self.resource_dir).map_err(|e| {
                    BackendError::Unavailable {
                        backend: NAME.to_string(),
                        reason: format!(
                            "cannot create {}: {}",
                            self.resource_dir.display(),
                            e
                        ),
                    }
                })?;

                match fs::create_dir(&dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        return Err(BackendError::ResourceConflict {
                            backend: NAME.to_string(),
                            identity: endpoint.identity.to_string(),
                        });
                    }
                    Err(e) => return Err(BackendError::io(NAME, "initialize", e)),
                }
            }
            Role::Reader => {
                if !dir.is_dir() {
                    return Err(BackendError::io(
                        NAME,
                        "initialize",
                        format!("{} does not exist", dir.display()),
                    ));
                }
            }
        }

        tracing::debug!(
            backend = NAME,
            dir = %dir.display(),
            role = %endpoint.role,
            "Attached file store"
        );

        self.dir = Some(dir);
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn write(&mut self, dataset: &Dataset) -> Result<(), BackendError> {
        require_role(NAME, self.endpoint.as_ref(), Role::Writer, "write")?;
        let dir = self.dir("write")?;
        let bytes = dataset.seal()?;

        let staging = dir.join(STAGING_FILE);
        fs::write(&staging, &bytes).map_err(|e| BackendError::io(NAME, "write", e))?;
        fs::rename(&staging, dir.join(DATA_FILE))
            .map_err(|e| BackendError::io(NAME, "write", e))?;

        self.sends += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Dataset, BackendError> {
        require_role(NAME, self.endpoint.as_ref(), Role::Reader, "read")?;
        let path = self.dir("read")?.join(DATA_FILE);

        match fs::read(&path) {
            Ok(bytes) => Ok(Dataset::open(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::NotReady),
            Err(e) => Err(BackendError::io(NAME, "read", e)),
        }
    }

    fn cleanup(&mut self) -> Result<(), BackendError> {
        let dir = self.dir.take();
        let endpoint = self.endpoint.take();

        if let (Some(dir), Some(endpoint)) = (dir, endpoint) {
            if endpoint.role.is_writer() {
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {
                        tracing::debug!(backend = NAME, dir = %dir.display(), "Removed file store")
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(BackendError::io(NAME, "cleanup", e)),
                }
            }
        }
        Ok(())
    }

    fn sends(&self) -> u64 {
        self.sends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BenchmarkCell, ResourceIdentity, ScenarioKind};

    fn endpoints(identity: &str) -> (Endpoint, Endpoint) {
        let cell = BenchmarkCell::new(NAME, ScenarioKind::Shared, 5, 1).unwrap();
        let id = ResourceIdentity::new(identity).unwrap();
        (
            Endpoint::for_cell(&cell, id.clone(), 0, 2),
            Endpoint::for_cell(&cell, id, 1, 2),
        )
    }

    #[test]
    fn test_not_ready_before_publish() {
        let tmp = tempfile::tempdir().unwrap();
        let (w, r) = endpoints("file_not_ready");

        let mut writer = FileBackend::new(tmp.path());
        let mut reader = FileBackend::new(tmp.path());
        writer.initialize(&w).unwrap();
        reader.initialize(&r).unwrap();

        assert!(matches!(reader.read(), Err(BackendError::NotReady)));

        let data = Dataset::generate(3, 5);
        writer.write(&data).unwrap();
        assert_eq!(reader.read().unwrap(), data);

        reader.cleanup().unwrap();
        writer.cleanup().unwrap();
        writer.cleanup().unwrap();
        assert!(!tmp.path().join("file_not_ready").exists());
    }

    #[test]
    fn test_stale_directory_is_a_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("file_stale")).unwrap();

        let (w, _) = endpoints("file_stale");
        let mut writer = FileBackend::new(tmp.path());
        assert!(matches!(
            writer.initialize(&w),
            Err(BackendError::ResourceConflict { .. })
        ));
        // cleanup after a failed initialize must leave the stale directory alone
        writer.cleanup().unwrap();
        assert!(tmp.path().join("file_stale").exists());
    }

    #[test]
    fn test_reader_cannot_write() {
        let tmp = tempfile::tempdir().unwrap();
        let (w, r) = endpoints("file_roles");
        let mut writer = FileBackend::new(tmp.path());
        let mut reader = FileBackend::new(tmp.path());
        writer.initialize(&w).unwrap();
        reader.initialize(&r).unwrap();

        assert!(matches!(
            reader.write(&Dataset::generate(1, 1)),
            Err(BackendError::RoleViolation { .. })
        ));
        assert!(matches!(
            writer.read(),
            Err(BackendError::RoleViolation { .. })
        ));
        writer.cleanup().unwrap();
    }
}
