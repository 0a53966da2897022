//! Extended attribute operations.
//!
//! Extended attributes are name-value pairs attached to files. Names follow
//! the usual namespace convention (`user.*`, `trusted.*`, `security.*`,
//! `system.*`); which namespaces are writable depends on the backend and the
//! assumed identity.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{FsError, XattrMode};

/// Extended attribute operations.
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use storage_helpers::{BackendXattr, FsError, XattrMode};
///
/// async fn tag(backend: &dyn BackendXattr, file_id: &str) -> Result<usize, FsError> {
///     backend
///         .setxattr(file_id, "user.tag", Bytes::from_static(b"hot"), XattrMode::Upsert)
///         .await?;
///     Ok(backend.listxattr(file_id).await?.len())
/// }
/// ```
#[async_trait]
pub trait BackendXattr: Send + Sync {
    /// Returns the value of attribute `name`.
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::NoAttribute`](crate::ErrorCode::NoAttribute) if the
    ///   attribute does not exist
    async fn getxattr(&self, file_id: &str, name: &str) -> Result<Bytes, FsError> {
        let _ = (file_id, name);
        Err(FsError::not_supported("getxattr"))
    }

    /// Sets attribute `name` to `value`.
    async fn setxattr(
        &self,
        file_id: &str,
        name: &str,
        value: Bytes,
        mode: XattrMode,
    ) -> Result<(), FsError> {
        let _ = (file_id, name, value, mode);
        Err(FsError::not_supported("setxattr"))
    }

    /// Removes attribute `name`.
    async fn removexattr(&self, file_id: &str, name: &str) -> Result<(), FsError> {
        let _ = (file_id, name);
        Err(FsError::not_supported("removexattr"))
    }

    /// Lists attribute names.
    async fn listxattr(&self, file_id: &str) -> Result<Vec<String>, FsError> {
        let _ = file_id;
        Err(FsError::not_supported("listxattr"))
    }
}
