//! Permission management operations.

use async_trait::async_trait;

use crate::FsError;

/// Mode and ownership changes.
///
/// Reading permissions is done via
/// [`BackendAttr::getattr`](super::BackendAttr::getattr).
#[async_trait]
pub trait BackendPermissions: Send + Sync {
    /// Sets the permission bits of `file_id`.
    async fn chmod(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        let _ = (file_id, mode);
        Err(FsError::not_supported("chmod"))
    }

    /// Changes owner and/or group; `None` leaves that field unchanged.
    async fn chown(
        &self,
        file_id: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), FsError> {
        let _ = (file_id, uid, gid);
        Err(FsError::not_supported("chown"))
    }
}
