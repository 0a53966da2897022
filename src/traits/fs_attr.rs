//! Attribute queries.

use async_trait::async_trait;

use crate::{Attributes, FsError};

/// Attribute and permission-check operations.
#[async_trait]
pub trait BackendAttr: Send + Sync {
    /// Returns the attributes of `file_id` without following a final symlink.
    async fn getattr(&self, file_id: &str) -> Result<Attributes, FsError> {
        let _ = file_id;
        Err(FsError::not_supported("getattr"))
    }

    /// Checks whether the current identity may access `file_id` with `mask`
    /// (`R_OK | W_OK | X_OK`, or `F_OK`).
    async fn access(&self, file_id: &str, mask: i32) -> Result<(), FsError> {
        let _ = (file_id, mask);
        Err(FsError::not_supported("access"))
    }
}
