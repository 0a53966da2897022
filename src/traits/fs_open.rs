//! Opening files.

use async_trait::async_trait;

use crate::{FileHandle, FsError, OpenFlags, Params};

/// Opens files and hands out [`FileHandle`]s.
///
/// This is the only capability every backend must implement; all others
/// default to [`ErrorCode::NotSupported`](crate::ErrorCode::NotSupported).
///
/// # Object Safety
///
/// This trait is object-safe and can be used as `dyn BackendOpen`.
#[async_trait]
pub trait BackendOpen: Send + Sync {
    /// Opens `file_id`.
    ///
    /// `params` carries per-open overrides understood by the backend (for
    /// example a different `uid`/`gid` on the POSIX drivers).
    ///
    /// # Errors
    ///
    /// - [`ErrorCode::NotFound`](crate::ErrorCode::NotFound) if the file does
    ///   not exist and `flags.create` is unset
    /// - [`ErrorCode::Domain`](crate::ErrorCode::Domain) if the identity
    ///   cannot be assumed
    async fn open(
        &self,
        file_id: &str,
        flags: OpenFlags,
        params: &Params,
    ) -> Result<Box<dyn FileHandle>, FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_open_is_object_safe() {
        fn _check(_: &dyn BackendOpen) {}
    }

    #[test]
    fn backend_open_requires_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        fn _check<T: BackendOpen>() {
            _assert_send_sync::<T>();
        }
    }
}
