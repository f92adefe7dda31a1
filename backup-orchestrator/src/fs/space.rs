//! Destination directory checks and free-space measurement.

use crate::utils::{OrchestratorError, Result};
use std::path::Path;

/// Source of "bytes available" for a filesystem path.
pub trait FreeSpace: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Measures the filesystem holding a path with `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemSpace;

impl FreeSpace for FilesystemSpace {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        available_bytes(path)
    }
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn available_bytes(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path)
        .map_err(|errno| OrchestratorError::Io(std::io::Error::from(errno)))?;
    #[allow(clippy::unnecessary_cast)]
    let available = stat.blocks_available() as u64 * stat.fragment_size() as u64;
    Ok(available)
}

/// Create `path` (and its parents) if missing; reject anything that is not a directory.
pub fn ensure_directory(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(OrchestratorError::NotADirectory(path.display().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Fail unless the filesystem holding `destination` can take `required` bytes.
///
/// The destination is created first so the measurement targets the real
/// filesystem rather than whichever ancestor happens to exist.
pub fn check_available_space(destination: &Path, required: u64, space: &dyn FreeSpace) -> Result<u64> {
    ensure_directory(destination)?;
    let available = space.available_bytes(destination)?;
    if available < required {
        return Err(OrchestratorError::InsufficientSpace { required, available });
    }
    Ok(available)
}
