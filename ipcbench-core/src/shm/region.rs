//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for the shm-based backends.
//! All unsafe operations are encapsulated with bounds checking.

use std::ffi::CString;
use std::ptr::NonNull;

use thiserror::Error;

/// Failures creating, attaching or mapping a region.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("Shared memory {name} already exists")]
    AlreadyExists { name: String },

    #[error("Shared memory {name} does not exist")]
    NotFound { name: String },

    #[error("Invalid shared memory request for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("{syscall} failed for {name}: {source}")]
    Os {
        syscall: &'static str,
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and will unmap it on drop.
/// The creating side also unlinks the name on drop.
pub struct SharedMemoryRegion {
    /// Name of the shared memory object (without the leading slash).
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// File descriptor for the shared memory object.
    fd: i32,
    /// Whether this instance created the SHM (and should unlink on drop).
    is_owner: bool,
}

// SAFETY: SharedMemoryRegion owns its mapping; moving it to another thread is sound.
unsafe impl Send for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Minimum size for a shared memory region.
    pub const MIN_SIZE: usize = 4096;

    /// Maximum size for a shared memory region (1 GB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create a new, zeroed shared memory region.
    ///
    /// Fails with [`RegionError::AlreadyExists`] if the name is still bound,
    /// typically by a run that crashed before releasing it.
    pub fn create(name: &str, size: usize) -> Result<Self, RegionError> {
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            return Err(RegionError::Invalid {
                name: name.to_string(),
                reason: format!(
                    "Size {} outside [{}, {}]",
                    size,
                    Self::MIN_SIZE,
                    Self::MAX_SIZE
                ),
            });
        }

        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EEXIST) {
                return Err(RegionError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(RegionError::Os {
                syscall: "shm_open",
                name: name.to_string(),
                source: errno,
            });
        }

        // SAFETY: fd is a valid file descriptor
        let result = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(RegionError::Os {
                syscall: "ftruncate",
                name: name.to_string(),
                source: errno,
            });
        }

        let ptr = match Self::map(fd, size, name) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        // ftruncate on a fresh object already yields zero pages.

        tracing::debug!(name = %name, size = size, "Created shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: true,
        })
    }

    /// Attach to an existing region, mapping its full current size.
    pub fn open(name: &str) -> Result<Self, RegionError> {
        let c_name = Self::c_name(name)?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::ENOENT) {
                return Err(RegionError::NotFound {
                    name: name.to_string(),
                });
            }
            return Err(RegionError::Os {
                syscall: "shm_open",
                name: name.to_string(),
                source: errno,
            });
        }

        // SAFETY: stat is plain old data and fd is valid
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let errno = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(RegionError::Os {
                syscall: "fstat",
                name: name.to_string(),
                source: errno,
            });
        }

        let size = stat.st_size as usize;
        if !(Self::MIN_SIZE..=Self::MAX_SIZE).contains(&size) {
            unsafe { libc::close(fd) };
            return Err(RegionError::Invalid {
                name: name.to_string(),
                reason: format!("Existing region has unusable size {}", size),
            });
        }

        let ptr = match Self::map(fd, size, name) {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "Opened shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            fd,
            is_owner: false,
        })
    }

    /// Remove a name left behind by a crashed run. Missing names are not an error.
    pub fn unlink(name: &str) -> Result<(), RegionError> {
        let c_name = Self::c_name(name)?;
        // SAFETY: c_name is a valid CString
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() != Some(libc::ENOENT) {
                return Err(RegionError::Os {
                    syscall: "shm_unlink",
                    name: name.to_string(),
                    source: errno,
                });
            }
        }
        Ok(())
    }

    fn c_name(name: &str) -> Result<CString, RegionError> {
        if name.is_empty() || name.contains('/') {
            return Err(RegionError::Invalid {
                name: name.to_string(),
                reason: "Name must be non-empty and contain no '/'".to_string(),
            });
        }

        CString::new(format!("/{}", name)).map_err(|e| RegionError::Invalid {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })
    }

    fn map(fd: i32, size: usize, name: &str) -> Result<NonNull<u8>, RegionError> {
        // SAFETY: fd is valid, size is validated, offset 0 is valid
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(RegionError::Os {
                syscall: "mmap",
                name: name.to_string(),
                source: std::io::Error::last_os_error(),
            });
        }

        NonNull::new(ptr as *mut u8).ok_or_else(|| RegionError::Invalid {
            name: name.to_string(),
            reason: "mmap returned a null mapping".to_string(),
        })
    }

    /// Get the name of this shared memory region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this handle created (and will unlink) the region.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// Callers must synchronize access to the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set during creation
        let result = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) };
        if result < 0 {
            tracing::error!(
                name = %self.name,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap shared memory"
            );
        }

        // SAFETY: fd was opened during creation
        unsafe { libc::close(self.fd) };

        if self.is_owner {
            if let Err(e) = Self::unlink(&self.name) {
                tracing::error!(name = %self.name, error = %e, "Failed to unlink shared memory");
            } else {
                tracing::debug!(name = %self.name, "Unlinked shared memory region");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(name: &str) -> String {
        format!("ipcbench-region-{}-{}", name, std::process::id())
    }

    #[test]
    fn test_shm_size_validation() {
        assert!(SharedMemoryRegion::create(&unique("small"), 100).is_err());
        assert!(
            SharedMemoryRegion::create(&unique("large"), SharedMemoryRegion::MAX_SIZE + 1).is_err()
        );
    }

    #[test]
    fn test_shm_invalid_names() {
        assert!(SharedMemoryRegion::create("", 4096).is_err());
        assert!(SharedMemoryRegion::create("a/b", 4096).is_err());
    }

    #[test]
    fn test_create_open_and_conflict() {
        let name = unique("conflict");
        let owner = SharedMemoryRegion::create(&name, 8192).unwrap();
        assert!(owner.is_owner());

        assert!(matches!(
            SharedMemoryRegion::create(&name, 8192),
            Err(RegionError::AlreadyExists { .. })
        ));

        let attached = SharedMemoryRegion::open(&name).unwrap();
        assert_eq!(attached.size(), 8192);
        assert!(!attached.is_owner());

        // SAFETY: both mappings are valid for 8192 bytes and used from this thread only
        unsafe {
            *owner.as_ptr().add(100) = 0x5A;
            assert_eq!(*attached.as_ptr().add(100), 0x5A);
        }

        drop(attached);
        drop(owner);
        assert!(matches!(
            SharedMemoryRegion::open(&name),
            Err(RegionError::NotFound { .. })
        ));
    }
}
