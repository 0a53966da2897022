//! Local-file driver.
//!
//! File identifiers are paths relative to a mount root. Every operation is
//! submitted to the backend's execution context, runs under the configured
//! identity and retries transient `errno` values.

use std::fs;
use std::future::Future;
use std::io::{self, IoSlice};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::io_retryable;
use crate::config::{get_param, get_param_or, identity_param, timeout_param};
use crate::dirlist::paginate;
use crate::identity::run_as;
use crate::metrics::{SharedMetrics, TimerGuard, noop};
use crate::{
    Attributes, BackendAttr, BackendDir, BackendLink, BackendOpen, BackendPermissions,
    BackendWrite, BackendXattr, BufChain, DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT, ErrorCode,
    ExecutionContext, FileHandle, FsError, Identity, IdentitySwitch, NodeKind, OpenFlags, Params,
    ReleaseFlag, RetryPolicy, ThreadFsIdentity, UserCtx, XattrMode, retry_call, submit, sys,
};

const METRIC_PREFIX: &str = "comp.helpers.mod.posix";

/// Initial buffer for `getxattr`; larger values take a second call.
const XATTR_INITIAL_CAPACITY: usize = 256;

/// Permission bits for files created through `open`.
const CREATE_MODE: u32 = 0o666;

/// Configuration of a [`LocalBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalConfig {
    /// Directory that file identifiers are resolved against.
    pub mount_point: PathBuf,
    /// Default identity for every operation.
    pub identity: Identity,
    /// Timeout advertised on open handles.
    pub timeout: Duration,
    /// Retry policy for native calls.
    pub retry: RetryPolicy,
}

impl LocalConfig {
    /// Configuration with defaults for everything but the mount point.
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            identity: Identity::UNSPECIFIED,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Parses `mountPoint`, `uid`, `gid`, `timeout` and `retryAttempts`.
    pub fn from_params(params: &Params) -> Result<Self, FsError> {
        let mount_point: String = get_param(params, "mountPoint")?;
        let attempts = get_param_or(params, "retryAttempts", DEFAULT_RETRY_ATTEMPTS)?;
        Ok(Self {
            mount_point: PathBuf::from(mount_point),
            identity: identity_param(params)?,
            timeout: timeout_param(params)?,
            retry: RetryPolicy::default().with_attempts(attempts),
        })
    }
}

/// The pieces every submitted call needs, cheap to clone into handles.
#[derive(Clone)]
struct Worker {
    executor: Arc<dyn ExecutionContext>,
    switch: Arc<dyn IdentitySwitch>,
    metrics: SharedMetrics,
    retry: RetryPolicy,
}

impl Worker {
    /// Submits `call` under `identity`, retrying transient failures.
    fn run<T, F>(
        &self,
        operation: &'static str,
        identity: Identity,
        call: F,
    ) -> impl Future<Output = Result<T, FsError>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnMut() -> io::Result<T> + Send + 'static,
    {
        let switch = Arc::clone(&self.switch);
        let metrics = Arc::clone(&self.metrics);
        let retry = self.retry;
        submit(self.executor.as_ref(), operation, move || {
            let mut call = call;
            let name = format!("{METRIC_PREFIX}.{operation}");
            run_as(switch.as_ref(), identity, operation, || {
                retry_call(&retry, &name, metrics.as_ref(), io_retryable, &mut call)
                    .map_err(|e| FsError::io(operation, &e))
            })
        })
    }
}

/// Driver for a directory tree on a locally mounted filesystem.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use storage_helpers::{BackendAttr, LocalBackend, LocalConfig, RuntimeBlocking};
///
/// # async fn demo() -> Result<(), storage_helpers::FsError> {
/// let executor = Arc::new(RuntimeBlocking::current().expect("inside a runtime"));
/// let backend = LocalBackend::new(LocalConfig::new("/mnt/data"), executor);
/// let attrs = backend.getattr("dir/file").await?;
/// println!("{} bytes", attrs.size);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    config: Arc<LocalConfig>,
    worker: Worker,
}

impl LocalBackend {
    /// Creates a driver that submits its work to `executor`.
    pub fn new(config: LocalConfig, executor: Arc<dyn ExecutionContext>) -> Self {
        let retry = config.retry;
        Self {
            config: Arc::new(config),
            worker: Worker {
                executor,
                switch: Arc::new(ThreadFsIdentity),
                metrics: noop(),
                retry,
            },
        }
    }

    /// Builds the driver from a parameter map.
    pub fn from_params(
        params: &Params,
        executor: Arc<dyn ExecutionContext>,
    ) -> Result<Self, FsError> {
        Ok(Self::new(LocalConfig::from_params(params)?, executor))
    }

    /// Replaces the identity mechanism.
    pub fn with_identity_switch(mut self, switch: Arc<dyn IdentitySwitch>) -> Self {
        self.worker.switch = switch;
        self
    }

    /// Reports metrics to `metrics`.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.worker.metrics = metrics;
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &LocalConfig {
        &self.config
    }

    /// Resolves `file_id` under the mount point.
    ///
    /// Identifiers containing `..` are rejected.
    fn root(&self, operation: &'static str, file_id: &str) -> Result<PathBuf, FsError> {
        resolve(&self.config.mount_point, operation, file_id)
    }

    fn run<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> impl Future<Output = Result<T, FsError>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnMut() -> io::Result<T> + Send + 'static,
    {
        self.worker.run(operation, self.config.identity, call)
    }

    /// Backend identity with per-open `uid`/`gid` overrides applied.
    fn open_identity(&self, params: &Params) -> Result<Identity, FsError> {
        let requested = identity_param(params)?;
        Ok(Identity {
            uid: requested.uid.or(self.config.identity.uid),
            gid: requested.gid.or(self.config.identity.gid),
        })
    }
}

fn resolve(mount_point: &Path, operation: &'static str, file_id: &str) -> Result<PathBuf, FsError> {
    let relative = Path::new(file_id.trim_start_matches('/'));
    if relative.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(FsError::with_message(
            ErrorCode::InvalidArgument,
            operation,
            format!("'{file_id}' escapes the mount point"),
        ));
    }
    Ok(mount_point.join(relative))
}

#[async_trait]
impl BackendOpen for LocalBackend {
    async fn open(
        &self,
        file_id: &str,
        flags: OpenFlags,
        params: &Params,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        let path = self.root("open", file_id)?;
        let identity = self.open_identity(params)?;
        let raw = flags.to_libc();
        let fd = self
            .worker
            .run("open", identity, move || sys::open(&path, raw, CREATE_MODE))
            .await?;
        debug!(file_id, ?flags, "opened file");
        Ok(Box::new(LocalFileHandle {
            file_id: file_id.to_string(),
            identity,
            fd: Arc::new(RwLock::new(Some(fd))),
            write_serial: Arc::new(Mutex::new(())),
            needs_release: ReleaseFlag::new(),
            worker: self.worker.clone(),
            timeout: self.config.timeout,
        }))
    }
}

#[async_trait]
impl BackendAttr for LocalBackend {
    async fn getattr(&self, file_id: &str) -> Result<Attributes, FsError> {
        let path = self.root("getattr", file_id)?;
        self.run("getattr", move || {
            fs::symlink_metadata(&path).map(|m| Attributes::from(&m))
        })
        .await
    }

    async fn access(&self, file_id: &str, mask: i32) -> Result<(), FsError> {
        let path = self.root("access", file_id)?;
        self.run("access", move || sys::access(&path, mask)).await
    }
}

#[async_trait]
impl BackendDir for LocalBackend {
    async fn readdir(
        &self,
        file_id: &str,
        offset: u64,
        count: usize,
    ) -> Result<Vec<String>, FsError> {
        let path = self.root("readdir", file_id)?;
        self.run("readdir", move || {
            let names = fs::read_dir(&path)?
                .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect::<io::Result<Vec<_>>>()?;
            Ok(paginate(names, offset, count))
        })
        .await
    }

    async fn mkdir(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        let path = self.root("mkdir", file_id)?;
        self.run("mkdir", move || fs::DirBuilder::new().mode(mode).create(&path))
            .await
    }

    async fn rmdir(&self, file_id: &str) -> Result<(), FsError> {
        let path = self.root("rmdir", file_id)?;
        self.run("rmdir", move || fs::remove_dir(&path)).await
    }

    async fn mknod(
        &self,
        file_id: &str,
        mode: u32,
        kind: NodeKind,
        rdev: u64,
    ) -> Result<(), FsError> {
        let path = self.root("mknod", file_id)?;
        let perms = mode & 0o7777;
        trace!(file_id, ?kind, mode = perms, "mknod");
        self.run("mknod", move || match kind {
            NodeKind::Regular => sys::open(
                &path,
                libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY,
                perms,
            )
            .and_then(sys::close),
            NodeKind::Fifo => sys::mkfifo(&path, perms),
            other => sys::mknod(&path, perms | other.mask(), rdev),
        })
        .await
    }
}

#[async_trait]
impl BackendWrite for LocalBackend {
    async fn unlink(&self, file_id: &str, _current_size: u64) -> Result<(), FsError> {
        let path = self.root("unlink", file_id)?;
        self.run("unlink", move || fs::remove_file(&path)).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let from = self.root("rename", from)?;
        let to = self.root("rename", to)?;
        self.run("rename", move || fs::rename(&from, &to)).await
    }

    async fn truncate(&self, file_id: &str, size: u64, _current_size: u64) -> Result<(), FsError> {
        let path = self.root("truncate", file_id)?;
        self.run("truncate", move || sys::truncate(&path, size)).await
    }
}

#[async_trait]
impl BackendLink for LocalBackend {
    async fn symlink(&self, from: &str, to: &str) -> Result<(), FsError> {
        let target = self.root("symlink", from)?;
        let link = self.root("symlink", to)?;
        self.run("symlink", move || std::os::unix::fs::symlink(&target, &link))
            .await
    }

    async fn link(&self, from: &str, to: &str) -> Result<(), FsError> {
        let original = self.root("link", from)?;
        let link = self.root("link", to)?;
        self.run("link", move || fs::hard_link(&original, &link)).await
    }

    async fn readlink(&self, file_id: &str) -> Result<String, FsError> {
        let path = self.root("readlink", file_id)?;
        self.run("readlink", move || {
            fs::read_link(&path).map(|target| target.to_string_lossy().into_owned())
        })
        .await
    }
}

#[async_trait]
impl BackendPermissions for LocalBackend {
    async fn chmod(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        let path = self.root("chmod", file_id)?;
        self.run("chmod", move || {
            fs::set_permissions(&path, fs::Permissions::from_mode(mode))
        })
        .await
    }

    async fn chown(
        &self,
        file_id: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), FsError> {
        let path = self.root("chown", file_id)?;
        self.run("chown", move || std::os::unix::fs::chown(&path, uid, gid))
            .await
    }
}

#[async_trait]
impl BackendXattr for LocalBackend {
    async fn getxattr(&self, file_id: &str, name: &str) -> Result<Bytes, FsError> {
        let path = self.root("getxattr", file_id)?;
        let name = name.to_string();
        let value = self
            .run("getxattr", move || {
                match sys::getxattr(&path, &name, XATTR_INITIAL_CAPACITY) {
                    Err(e) if e.raw_os_error() == Some(libc::ERANGE) => {
                        let size = sys::getxattr(&path, &name, 0)?.len();
                        sys::getxattr(&path, &name, size)
                    }
                    other => other,
                }
            })
            .await?;
        Ok(Bytes::from(value))
    }

    async fn setxattr(
        &self,
        file_id: &str,
        name: &str,
        value: Bytes,
        mode: XattrMode,
    ) -> Result<(), FsError> {
        let path = self.root("setxattr", file_id)?;
        let name = name.to_string();
        self.run("setxattr", move || sys::setxattr(&path, &name, &value, mode))
            .await
    }

    async fn removexattr(&self, file_id: &str, name: &str) -> Result<(), FsError> {
        let path = self.root("removexattr", file_id)?;
        let name = name.to_string();
        self.run("removexattr", move || sys::removexattr(&path, &name))
            .await
    }

    async fn listxattr(&self, file_id: &str) -> Result<Vec<String>, FsError> {
        let path = self.root("listxattr", file_id)?;
        self.run("listxattr", move || {
            let size = sys::listxattr(&path, 0)?.len();
            if size == 0 {
                return Ok(Vec::new());
            }
            Ok(sys::split_names(&sys::listxattr(&path, size)?))
        })
        .await
    }
}

/// A descriptor opened by [`LocalBackend`].
///
/// The descriptor is closed by the first [`release`](FileHandle::release) or,
/// failing that, when the handle is dropped. Operations after release fail
/// with [`ErrorCode::BadDescriptor`].
pub struct LocalFileHandle {
    file_id: String,
    identity: Identity,
    fd: Arc<RwLock<Option<OwnedFd>>>,
    // lseek + writev must not interleave between writers
    write_serial: Arc<Mutex<()>>,
    needs_release: ReleaseFlag,
    worker: Worker,
    timeout: Duration,
}

fn with_fd<T>(
    fd: &RwLock<Option<OwnedFd>>,
    call: impl FnOnce(BorrowedFd<'_>) -> io::Result<T>,
) -> io::Result<T> {
    let guard = fd.read();
    let fd = guard
        .as_ref()
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))?;
    call(fd.as_fd())
}

/// Seeks to `offset` and writes every fragment, at most `iov_max` buffers
/// per `writev` call. Short writes resume where the kernel stopped.
fn write_fragments(
    fd: BorrowedFd<'_>,
    offset: u64,
    fragments: &[Bytes],
    iov_max: usize,
) -> io::Result<usize> {
    sys::lseek(fd, offset)?;

    let mut slices: Vec<IoSlice<'_>> = fragments.iter().map(|f| IoSlice::new(f)).collect();
    let mut remaining: &mut [IoSlice<'_>] = &mut slices;
    let mut written = 0;
    while !remaining.is_empty() {
        let batch = remaining.len().min(iov_max);
        let n = sys::writev(fd, &remaining[..batch])?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        written += n;
        IoSlice::advance_slices(&mut remaining, n);
    }
    Ok(written)
}

#[async_trait]
impl FileHandle for LocalFileHandle {
    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn read(&self, offset: u64, size: usize) -> Result<Bytes, FsError> {
        let timer = TimerGuard::start(self.worker.metrics.as_ref(), format!("{METRIC_PREFIX}.read"));
        let fd = Arc::clone(&self.fd);
        let result = self
            .worker
            .run("read", self.identity, move || {
                with_fd(&fd, |fd| sys::pread(fd, size, offset))
            })
            .await;
        match result {
            Ok(data) => {
                timer.stop(data.len() as u64);
                Ok(Bytes::from(data))
            }
            Err(e) => {
                self.worker
                    .metrics
                    .counter_inc(&format!("{METRIC_PREFIX}.errors.read"));
                Err(e)
            }
        }
    }

    async fn write(&self, offset: u64, buf: BufChain) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let timer = TimerGuard::start(self.worker.metrics.as_ref(), format!("{METRIC_PREFIX}.write"));
        let fd = Arc::clone(&self.fd);
        let serial = Arc::clone(&self.write_serial);
        let iov_max = sys::iov_max();
        let result = self
            .worker
            .run("write", self.identity, move || {
                let _serial = serial.lock();
                with_fd(&fd, |fd| write_fragments(fd, offset, buf.fragments(), iov_max))
            })
            .await;
        match result {
            Ok(written) => {
                timer.stop(written as u64);
                Ok(written)
            }
            Err(e) => {
                self.worker
                    .metrics
                    .counter_inc(&format!("{METRIC_PREFIX}.errors.write"));
                Err(e)
            }
        }
    }

    async fn flush(&self) -> Result<(), FsError> {
        self.worker.run("flush", self.identity, || Ok(())).await
    }

    async fn fsync(&self, data_only: bool) -> Result<(), FsError> {
        let fd = Arc::clone(&self.fd);
        self.worker
            .run("fsync", self.identity, move || {
                with_fd(&fd, |fd| sys::fsync(fd, data_only))
            })
            .await
    }

    async fn release(&self) -> Result<(), FsError> {
        if !self.needs_release.take() {
            return Ok(());
        }
        let fd = Arc::clone(&self.fd);
        let switch = Arc::clone(&self.worker.switch);
        let identity = self.identity;
        let file_id = self.file_id.clone();
        submit(self.worker.executor.as_ref(), "release", move || {
            let ctx = UserCtx::enter(switch.as_ref(), identity);
            let valid = ctx.valid();
            if let Some(fd) = fd.write().take() {
                close_logged(&file_id, fd);
            }
            drop(ctx);
            if valid {
                debug!(file_id = %file_id, "released file");
                Ok(())
            } else {
                Err(FsError::domain("release"))
            }
        })
        .await
    }
}

fn close_logged(file_id: &str, fd: OwnedFd) {
    if let Err(e) = sys::close(fd) {
        warn!(file_id, error = %e, "failed to release file");
    }
}

impl Drop for LocalFileHandle {
    fn drop(&mut self) {
        if self.needs_release.take() {
            if let Some(fd) = self.fd.write().take() {
                close_logged(&self.file_id, fd);
            }
        }
    }
}

impl std::fmt::Debug for LocalFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileHandle")
            .field("file_id", &self.file_id)
            .field("identity", &self.identity)
            .field("open", &self.needs_release.is_open())
            .finish()
    }
}
