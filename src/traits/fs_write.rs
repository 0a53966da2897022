//! Namespace mutations: unlink, rename, truncate.

use async_trait::async_trait;

use crate::FsError;

/// Removing, renaming and resizing files.
///
/// `current_size` arguments carry the caller's view of the file size. POSIX
/// backends ignore them; backends that rewrite whole objects use them to
/// avoid an extra round trip.
#[async_trait]
pub trait BackendWrite: Send + Sync {
    /// Removes a file.
    async fn unlink(&self, file_id: &str, current_size: u64) -> Result<(), FsError> {
        let _ = (file_id, current_size);
        Err(FsError::not_supported("unlink"))
    }

    /// Renames `from` to `to`, replacing `to` if it exists.
    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let _ = (from, to);
        Err(FsError::not_supported("rename"))
    }

    /// Truncates or zero-extends `file_id` to `size` bytes.
    async fn truncate(&self, file_id: &str, size: u64, current_size: u64) -> Result<(), FsError> {
        let _ = (file_id, size, current_size);
        Err(FsError::not_supported("truncate"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_write_is_object_safe() {
        fn _check(_: &dyn BackendWrite) {}
    }

    #[test]
    fn backend_write_requires_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        fn _check<T: BackendWrite>() {
            _assert_send_sync::<T>();
        }
    }
}
