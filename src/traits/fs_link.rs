//! Symlink and hard link operations.

use async_trait::async_trait;

use crate::FsError;

/// Symlink and hard link operations.
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `dyn BackendLink`.
#[async_trait]
pub trait BackendLink: Send + Sync {
    /// Creates a symbolic link at `to` pointing at `from`.
    async fn symlink(&self, from: &str, to: &str) -> Result<(), FsError> {
        let _ = (from, to);
        Err(FsError::not_supported("symlink"))
    }

    /// Creates a hard link at `to` for the existing file `from`.
    async fn link(&self, from: &str, to: &str) -> Result<(), FsError> {
        let _ = (from, to);
        Err(FsError::not_supported("link"))
    }

    /// Reads the raw target of a symbolic link.
    async fn readlink(&self, file_id: &str) -> Result<String, FsError> {
        let _ = file_id;
        Err(FsError::not_supported("readlink"))
    }
}
