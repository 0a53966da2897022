//! Directory and node operations.

use async_trait::async_trait;

use crate::{FsError, NodeKind};

/// Directory listing and node creation.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`. Methods use `&self` to allow
/// concurrent access.
#[async_trait]
pub trait BackendDir: Send + Sync {
    /// Lists up to `count` entry names of `file_id`, skipping the first
    /// `offset`.
    ///
    /// `.` and `..` are never returned and never counted. Enumeration order
    /// is whatever the backend reports, which is stable for an unchanged
    /// directory.
    async fn readdir(
        &self,
        file_id: &str,
        offset: u64,
        count: usize,
    ) -> Result<Vec<String>, FsError> {
        let _ = (file_id, offset, count);
        Err(FsError::not_supported("readdir"))
    }

    /// Creates a directory with permission bits `mode`.
    async fn mkdir(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        let _ = (file_id, mode);
        Err(FsError::not_supported("mkdir"))
    }

    /// Removes an empty directory.
    async fn rmdir(&self, file_id: &str) -> Result<(), FsError> {
        let _ = file_id;
        Err(FsError::not_supported("rmdir"))
    }

    /// Creates a node of `kind` with permission bits `mode`.
    ///
    /// `rdev` is only meaningful for device nodes.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::AlreadyExists`](crate::ErrorCode::AlreadyExists) if
    ///   `file_id` exists
    async fn mknod(
        &self,
        file_id: &str,
        mode: u32,
        kind: NodeKind,
        rdev: u64,
    ) -> Result<(), FsError> {
        let _ = (file_id, mode, kind, rdev);
        Err(FsError::not_supported("mknod"))
    }
}
