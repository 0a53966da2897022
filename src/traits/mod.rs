//! # Backend Traits
//!
//! The capability interface every storage driver implements.
//!
//! ## Capabilities
//!
//! | Trait | Operations |
//! |-------|------------|
//! | [`BackendOpen`] | `open` (required) |
//! | [`BackendAttr`] | `getattr`, `access` |
//! | [`BackendDir`] | `readdir`, `mkdir`, `rmdir`, `mknod` |
//! | [`BackendWrite`] | `unlink`, `rename`, `truncate` |
//! | [`BackendLink`] | `symlink`, `link`, `readlink` |
//! | [`BackendPermissions`] | `chmod`, `chown` |
//! | [`BackendXattr`] | `getxattr`, `setxattr`, `removexattr`, `listxattr` |
//!
//! Except for `open`, every operation has a default implementation failing
//! with [`ErrorCode::NotSupported`](crate::ErrorCode::NotSupported). A driver
//! implements the operations its storage system supports and leaves the rest
//! to the defaults, so an inapplicable operation never silently succeeds.
//!
//! ## Blanket Implementation
//!
//! [`StorageBackend`] combines all capabilities and is implemented
//! automatically for any type implementing the component traits:
//!
//! ```rust
//! use async_trait::async_trait;
//! use storage_helpers::*;
//!
//! struct Empty;
//!
//! #[async_trait]
//! impl BackendOpen for Empty {
//!     async fn open(&self, _: &str, _: OpenFlags, _: &Params) -> Result<Box<dyn FileHandle>, FsError> {
//!         Err(FsError::new(ErrorCode::NotFound, "open"))
//!     }
//! }
//! #[async_trait] impl BackendAttr for Empty {}
//! #[async_trait] impl BackendDir for Empty {}
//! #[async_trait] impl BackendWrite for Empty {}
//! #[async_trait] impl BackendLink for Empty {}
//! #[async_trait] impl BackendPermissions for Empty {}
//! #[async_trait] impl BackendXattr for Empty {}
//!
//! fn use_backend(_: &dyn StorageBackend) {}
//! use_backend(&Empty);
//! ```
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` and take `&self`; drivers keep their
//! state behind `Arc`s and locks.

mod fs_attr;
mod fs_dir;
mod fs_handles;
mod fs_link;
mod fs_open;
mod fs_permissions;
mod fs_write;
mod fs_xattr;

pub use fs_attr::BackendAttr;
pub use fs_dir::BackendDir;
pub use fs_handles::{FileHandle, ReleaseFlag};
pub use fs_link::BackendLink;
pub use fs_open::BackendOpen;
pub use fs_permissions::BackendPermissions;
pub use fs_write::BackendWrite;
pub use fs_xattr::BackendXattr;

/// The complete operation set of a storage backend.
///
/// Never implement this directly; implement the component traits.
pub trait StorageBackend:
    BackendOpen + BackendAttr + BackendDir + BackendWrite + BackendLink + BackendPermissions + BackendXattr
{
}

impl<T> StorageBackend for T where
    T: BackendOpen
        + BackendAttr
        + BackendDir
        + BackendWrite
        + BackendLink
        + BackendPermissions
        + BackendXattr
{
}
