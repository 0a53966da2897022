//! # storage-helpers
//!
//! One asynchronous file-operation interface over heterogeneous storage:
//! a local directory tree, an object store, a distributed filesystem volume,
//! or a remote party reached through a proxy channel.
//!
//! Every driver implements the same capability traits, returns the same
//! normalized [`FsError`], retries transient failures under a bounded
//! [`RetryPolicy`], and runs blocking native calls on an
//! [`ExecutionContext`] so callers only ever await.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storage_helpers::backends::local::{LocalBackend, LocalConfig};
//! use storage_helpers::{BackendOpen, BufChain, OpenFlags, Params, RuntimeBlocking};
//!
//! # async fn demo() -> Result<(), storage_helpers::FsError> {
//! let executor = Arc::new(RuntimeBlocking::current().expect("inside a tokio runtime"));
//! let backend = LocalBackend::new(LocalConfig::new("/srv/space"), executor);
//!
//! let handle = backend.open("notes.txt", OpenFlags::CREATE, &Params::new()).await?;
//! handle.write(0, BufChain::from(&b"hello"[..])).await?;
//! let data = handle.read(0, 5).await?;
//! assert_eq!(&data[..], b"hello");
//! handle.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`StorageBackend`] | All capability traits combined; what callers hold |
//! | [`FileHandle`] | An open file: `read`, `write`, `multiwrite`, `fsync`, `release` |
//! | [`FsError`] / [`ErrorCode`] | Normalized error taxonomy shared by every driver |
//! | [`RetryPolicy`] | Bounded retry with exponential back-off |
//! | [`UserCtx`] | Scoped filesystem identity, restored on drop |
//! | [`WorkerPool`] / [`RuntimeBlocking`] | Execution contexts for blocking calls |
//! | [`Attributes`] | `stat`-like file attributes |
//!
//! ---
//!
//! ## Drivers
//!
//! | Driver | Module |
//! |--------|--------|
//! | Local file tree | [`backends::local`] |
//! | Object storage | [`backends::object`] |
//! | Distributed filesystem | [`backends::distributed`] |
//! | Remote proxy | [`backends::proxy`] |
//!
//! Storage clients (object-store SDK, distributed-filesystem library, proxy
//! transport) are collaborators supplied by the caller through the traits
//! each driver module defines.
//!
//! ---
//!
//! ## Error Handling
//!
//! ```rust
//! use storage_helpers::{ErrorCode, FsError};
//!
//! let err = FsError::from_errno(libc::ENOENT, "getattr");
//! assert_eq!(err.code(), ErrorCode::NotFound);
//! assert_eq!(err.to_string(), "getattr: no such file or directory");
//! ```
//!
//! Unknown native errors become [`ErrorCode::Io`]; a failure is never reported
//! as success.
//!
//! ---
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` and take `&self`. Drivers are cheap to
//! clone and can be shared across tasks; handles may be used concurrently.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialization for configs, [`Attributes`], [`RetryPolicy`] and proxy messages |

// Private modules
mod config;
mod dirlist;
mod error;
mod executor;
mod identity;
mod metrics;
mod retry;
mod sys;
mod traits;
mod types;

pub mod backends;

// Public re-exports - errors
pub use error::{ErrorCode, FsError};

// Public re-exports - core types
pub use types::{Attributes, BufChain, FileType, Identity, NodeKind, OpenFlags, XattrMode};

// Public re-exports - configuration
pub use config::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT, Params, get_param, get_param_or};

// Public re-exports - capability traits
pub use traits::{
    BackendAttr, BackendDir, BackendLink, BackendOpen, BackendPermissions, BackendWrite,
    BackendXattr, FileHandle, ReleaseFlag, StorageBackend,
};

// Public re-exports - infrastructure
pub use dirlist::paginate;
pub use executor::{ExecutionContext, RuntimeBlocking, Task, WorkerPool, submit};
pub use identity::{IdentitySwitch, NoIdentity, ThreadFsIdentity, UserCtx, run_as};
pub use metrics::{MetricsRecorder, MetricsSink, NoopMetrics, SharedMetrics, TimerGuard};
pub use retry::{RetryPolicy, Verdict, retry_call, with_retry};

// Public re-exports - drivers
pub use backends::distributed::{DistributedBackend, DistributedConfig};
pub use backends::local::{LocalBackend, LocalConfig};
pub use backends::object::{ObjectBackend, ObjectConfig};
pub use backends::proxy::{ProxyBackend, ProxyConfig};
