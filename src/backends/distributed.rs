//! Distributed-filesystem driver.
//!
//! Mirrors the local-file driver, but every call goes through a
//! [`DfsClient`] (a volume-level client library) instead of the kernel, and
//! open files are the client's own [`DfsFile`] objects. The driver owns a
//! dedicated [`WorkerPool`]: the client library blocks its calling thread
//! and needs at least two of them to make progress.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::is_posix_retryable;
use crate::config::{get_param, get_param_or, identity_param, timeout_param};
use crate::dirlist::paginate;
use crate::identity::run_as;
use crate::metrics::{MetricsSink, SharedMetrics, TimerGuard, noop};
use crate::{
    Attributes, BackendAttr, BackendDir, BackendLink, BackendOpen, BackendPermissions,
    BackendWrite, BackendXattr, BufChain, DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT, ErrorCode,
    FileHandle, FsError, Identity, IdentitySwitch, NoIdentity, NodeKind, OpenFlags, Params,
    ReleaseFlag, RetryPolicy, UserCtx, WorkerPool, XattrMode, retry_call, submit,
};

const METRIC_PREFIX: &str = "comp.helpers.mod.glusterfs";

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Fewest worker threads the client library can run with.
pub const MIN_WORKER_THREADS: usize = 2;

/// Default management port of the volume server.
pub const DEFAULT_PORT: u16 = 24007;

/// Result of a client call; errors are raw `errno` values.
pub type DfsResult<T> = Result<T, i32>;

/// A file opened through a [`DfsClient`].
pub trait DfsFile: Send + Sync {
    /// Reads up to `size` bytes at `offset`.
    fn pread(&self, offset: u64, size: usize) -> DfsResult<Vec<u8>>;

    /// Writes `data` at `offset`; may write fewer bytes than given.
    fn pwrite(&self, offset: u64, data: &[u8]) -> DfsResult<usize>;

    /// Flushes the file to stable storage.
    fn fsync(&self, data_only: bool) -> DfsResult<()>;

    /// Closes the file. Called at most once.
    fn close(&self) -> DfsResult<()>;
}

/// Blocking client of a distributed filesystem volume.
///
/// Paths are absolute within the volume.
pub trait DfsClient: Send + Sync {
    /// Establishes the session with the volume servers.
    fn connect(&self) -> DfsResult<()>;

    /// Identity mechanism of the client library.
    ///
    /// Libraries that set the caller identity per thread expose it here.
    fn identity(&self) -> &dyn IdentitySwitch {
        &NoIdentity
    }

    /// Opens `path` with raw `open(2)` flags.
    fn open(&self, path: &str, flags: i32) -> DfsResult<Box<dyn DfsFile>>;

    /// `lstat`.
    fn stat(&self, path: &str) -> DfsResult<Attributes>;

    /// `access`.
    fn access(&self, path: &str, mask: i32) -> DfsResult<()>;

    /// All entry names of a directory, in the server's order.
    fn readdir(&self, path: &str) -> DfsResult<Vec<String>>;

    /// `readlink`.
    fn readlink(&self, path: &str) -> DfsResult<String>;

    /// `mknod` with type bits already in `mode`.
    fn mknod(&self, path: &str, mode: u32, rdev: u64) -> DfsResult<()>;

    /// `mkdir`.
    fn mkdir(&self, path: &str, mode: u32) -> DfsResult<()>;

    /// `unlink`.
    fn unlink(&self, path: &str) -> DfsResult<()>;

    /// `rmdir`.
    fn rmdir(&self, path: &str) -> DfsResult<()>;

    /// Creates `link` pointing at `target`.
    fn symlink(&self, target: &str, link: &str) -> DfsResult<()>;

    /// `rename`.
    fn rename(&self, from: &str, to: &str) -> DfsResult<()>;

    /// `link`.
    fn link(&self, from: &str, to: &str) -> DfsResult<()>;

    /// `chmod`.
    fn chmod(&self, path: &str, mode: u32) -> DfsResult<()>;

    /// `chown`; `None` leaves that field alone.
    fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> DfsResult<()>;

    /// `truncate`.
    fn truncate(&self, path: &str, size: u64) -> DfsResult<()>;

    /// `getxattr`.
    fn getxattr(&self, path: &str, name: &str) -> DfsResult<Vec<u8>>;

    /// `setxattr`.
    fn setxattr(&self, path: &str, name: &str, value: &[u8], mode: XattrMode) -> DfsResult<()>;

    /// `removexattr`.
    fn removexattr(&self, path: &str, name: &str) -> DfsResult<()>;

    /// `listxattr`.
    fn listxattr(&self, path: &str) -> DfsResult<Vec<String>>;
}

/// Configuration of a [`DistributedBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistributedConfig {
    /// Directory inside the volume that file identifiers are resolved against.
    pub mount_point: String,
    /// Volume server host.
    pub hostname: String,
    /// Volume server port.
    pub port: u16,
    /// Volume name.
    pub volume: String,
    /// Transport (`tcp`, `rdma`, ...).
    pub transport: String,
    /// Translator options as `(key, value)` pairs.
    pub xlator_options: Vec<(String, String)>,
    /// Default identity for every operation.
    pub identity: Identity,
    /// Timeout advertised on open handles.
    pub timeout: Duration,
    /// Size of the dedicated worker pool.
    pub worker_threads: usize,
    /// Retry policy for client calls.
    pub retry: RetryPolicy,
}

impl DistributedConfig {
    /// Configuration with defaults for everything but host and volume.
    pub fn new(hostname: impl Into<String>, volume: impl Into<String>) -> Self {
        Self {
            mount_point: "/".to_string(),
            hostname: hostname.into(),
            port: DEFAULT_PORT,
            volume: volume.into(),
            transport: "tcp".to_string(),
            xlator_options: Vec::new(),
            identity: Identity::UNSPECIFIED,
            timeout: DEFAULT_TIMEOUT,
            worker_threads: DEFAULT_WORKER_THREADS,
            retry: RetryPolicy::default(),
        }
    }

    /// Parses `mountPoint`, `hostname`, `port`, `volume`, `transport`,
    /// `xlatorOptions`, `uid`, `gid`, `timeout`, `workerThreads` and
    /// `retryAttempts`.
    ///
    /// `xlatorOptions` is a `;`-separated list of `key=value` pairs.
    pub fn from_params(params: &Params) -> Result<Self, FsError> {
        let attempts = get_param_or(params, "retryAttempts", DEFAULT_RETRY_ATTEMPTS)?;
        let xlator = get_param_or(params, "xlatorOptions", String::new())?;
        Ok(Self {
            mount_point: get_param_or(params, "mountPoint", "/".to_string())?,
            hostname: get_param(params, "hostname")?,
            port: get_param_or(params, "port", DEFAULT_PORT)?,
            volume: get_param(params, "volume")?,
            transport: get_param_or(params, "transport", "tcp".to_string())?,
            xlator_options: parse_xlator_options(&xlator)?,
            identity: identity_param(params)?,
            timeout: timeout_param(params)?,
            worker_threads: get_param_or(params, "workerThreads", DEFAULT_WORKER_THREADS)?,
            retry: RetryPolicy::default().with_attempts(attempts),
        })
    }
}

fn parse_xlator_options(raw: &str) -> Result<Vec<(String, String)>, FsError> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(FsError::with_message(
                ErrorCode::InvalidArgument,
                "config",
                format!("invalid translator option '{pair}'"),
            )),
        })
        .collect()
}

/// Driver for a distributed filesystem volume.
#[derive(Clone)]
pub struct DistributedBackend {
    config: Arc<DistributedConfig>,
    client: Arc<dyn DfsClient>,
    pool: Arc<WorkerPool>,
    connected: Arc<Mutex<bool>>,
    metrics: SharedMetrics,
}

impl DistributedBackend {
    /// Creates the driver and its worker pool.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidArgument`] if `config.worker_threads` is below
    /// [`MIN_WORKER_THREADS`].
    pub fn new(config: DistributedConfig, client: Arc<dyn DfsClient>) -> Result<Self, FsError> {
        if config.worker_threads < MIN_WORKER_THREADS {
            return Err(FsError::with_message(
                ErrorCode::InvalidArgument,
                "config",
                format!(
                    "at least {MIN_WORKER_THREADS} worker threads are required, got {}",
                    config.worker_threads
                ),
            ));
        }
        let pool = WorkerPool::new(format!("dfs-{}", config.volume), config.worker_threads)?;
        Ok(Self {
            config: Arc::new(config),
            client,
            pool: Arc::new(pool),
            connected: Arc::new(Mutex::new(false)),
            metrics: noop(),
        })
    }

    /// Reports metrics to `metrics`.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &DistributedConfig {
        &self.config
    }

    /// Connects to the volume. Later calls return immediately once a
    /// connection has been made.
    pub async fn connect(&self) -> Result<(), FsError> {
        let client = Arc::clone(&self.client);
        let connected = Arc::clone(&self.connected);
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        submit(self.pool.as_ref(), "connect", move || {
            ensure_connected(&connected, client.as_ref(), &config, metrics.as_ref())
        })
        .await
    }

    fn path(&self, operation: &'static str, file_id: &str) -> Result<String, FsError> {
        resolve(&self.config.mount_point, operation, file_id)
    }

    fn run<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> impl Future<Output = Result<T, FsError>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnMut(&dyn DfsClient) -> DfsResult<T> + Send + 'static,
    {
        self.run_as(operation, self.config.identity, call)
    }

    /// Submits `call` to the pool: connects if needed, assumes `identity`,
    /// retries transient `errno` values.
    fn run_as<T, F>(
        &self,
        operation: &'static str,
        identity: Identity,
        call: F,
    ) -> impl Future<Output = Result<T, FsError>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnMut(&dyn DfsClient) -> DfsResult<T> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let connected = Arc::clone(&self.connected);
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        submit(self.pool.as_ref(), operation, move || {
            ensure_connected(&connected, client.as_ref(), &config, metrics.as_ref())?;
            let mut call = call;
            let name = format!("{METRIC_PREFIX}.{operation}");
            run_as(client.identity(), identity, operation, || {
                retry_call(
                    &config.retry,
                    &name,
                    metrics.as_ref(),
                    |errno: &i32| is_posix_retryable(*errno),
                    || call(client.as_ref()),
                )
                .map_err(|errno| FsError::from_errno(errno, operation))
            })
        })
    }
}

impl fmt::Debug for DistributedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedBackend")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("connected", &self.connected.try_lock().map(|c| *c))
            .finish()
    }
}

fn ensure_connected(
    connected: &Mutex<bool>,
    client: &dyn DfsClient,
    config: &DistributedConfig,
    metrics: &dyn MetricsSink,
) -> Result<(), FsError> {
    let mut connected = connected.lock();
    if *connected {
        return Ok(());
    }
    retry_call(
        &config.retry,
        &format!("{METRIC_PREFIX}.connect"),
        metrics,
        |errno: &i32| is_posix_retryable(*errno),
        || client.connect(),
    )
    .map_err(|errno| FsError::from_errno(errno, "connect"))?;
    info!(
        host = %config.hostname,
        port = config.port,
        volume = %config.volume,
        transport = %config.transport,
        "connected to volume"
    );
    *connected = true;
    Ok(())
}

fn resolve(root: &str, operation: &'static str, file_id: &str) -> Result<String, FsError> {
    let relative = file_id.trim_start_matches('/');
    if relative.split('/').any(|part| part == "..") {
        return Err(FsError::with_message(
            ErrorCode::InvalidArgument,
            operation,
            format!("'{file_id}' escapes the mount point"),
        ));
    }
    let root = root.trim_end_matches('/');
    if relative.is_empty() {
        return Ok(if root.is_empty() { "/".to_string() } else { root.to_string() });
    }
    Ok(format!("{root}/{relative}"))
}

#[async_trait]
impl BackendOpen for DistributedBackend {
    async fn open(
        &self,
        file_id: &str,
        flags: OpenFlags,
        params: &Params,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        let path = self.path("open", file_id)?;
        let requested = identity_param(params)?;
        let identity = Identity {
            uid: requested.uid.or(self.config.identity.uid),
            gid: requested.gid.or(self.config.identity.gid),
        };
        let raw = flags.to_libc();
        let file = self
            .run_as("open", identity, move |client| client.open(&path, raw))
            .await?;
        debug!(file_id, ?flags, "opened file");
        Ok(Box::new(DistributedFileHandle {
            file_id: file_id.to_string(),
            identity,
            file: Arc::new(RwLock::new(Some(file))),
            needs_release: ReleaseFlag::new(),
            backend: self.clone(),
        }))
    }
}

#[async_trait]
impl BackendAttr for DistributedBackend {
    async fn getattr(&self, file_id: &str) -> Result<Attributes, FsError> {
        let path = self.path("getattr", file_id)?;
        self.run("getattr", move |client| client.stat(&path)).await
    }

    async fn access(&self, file_id: &str, mask: i32) -> Result<(), FsError> {
        let path = self.path("access", file_id)?;
        self.run("access", move |client| client.access(&path, mask))
            .await
    }
}

#[async_trait]
impl BackendDir for DistributedBackend {
    async fn readdir(
        &self,
        file_id: &str,
        offset: u64,
        count: usize,
    ) -> Result<Vec<String>, FsError> {
        let path = self.path("readdir", file_id)?;
        let names = self
            .run("readdir", move |client| client.readdir(&path))
            .await?;
        Ok(paginate(names, offset, count))
    }

    async fn mkdir(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        let path = self.path("mkdir", file_id)?;
        self.run("mkdir", move |client| client.mkdir(&path, mode))
            .await
    }

    async fn rmdir(&self, file_id: &str) -> Result<(), FsError> {
        let path = self.path("rmdir", file_id)?;
        self.run("rmdir", move |client| client.rmdir(&path)).await
    }

    async fn mknod(
        &self,
        file_id: &str,
        mode: u32,
        kind: NodeKind,
        rdev: u64,
    ) -> Result<(), FsError> {
        let path = self.path("mknod", file_id)?;
        let mode = (mode & 0o7777) | kind.mask();
        self.run("mknod", move |client| client.mknod(&path, mode, rdev))
            .await
    }
}

#[async_trait]
impl BackendWrite for DistributedBackend {
    async fn unlink(&self, file_id: &str, _current_size: u64) -> Result<(), FsError> {
        let path = self.path("unlink", file_id)?;
        self.run("unlink", move |client| client.unlink(&path)).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let from = self.path("rename", from)?;
        let to = self.path("rename", to)?;
        self.run("rename", move |client| client.rename(&from, &to))
            .await
    }

    async fn truncate(&self, file_id: &str, size: u64, _current_size: u64) -> Result<(), FsError> {
        let path = self.path("truncate", file_id)?;
        self.run("truncate", move |client| client.truncate(&path, size))
            .await
    }
}

#[async_trait]
impl BackendLink for DistributedBackend {
    async fn symlink(&self, from: &str, to: &str) -> Result<(), FsError> {
        let target = self.path("symlink", from)?;
        let link = self.path("symlink", to)?;
        self.run("symlink", move |client| client.symlink(&target, &link))
            .await
    }

    async fn link(&self, from: &str, to: &str) -> Result<(), FsError> {
        let original = self.path("link", from)?;
        let link = self.path("link", to)?;
        self.run("link", move |client| client.link(&original, &link))
            .await
    }

    async fn readlink(&self, file_id: &str) -> Result<String, FsError> {
        let path = self.path("readlink", file_id)?;
        self.run("readlink", move |client| client.readlink(&path))
            .await
    }
}

#[async_trait]
impl BackendPermissions for DistributedBackend {
    async fn chmod(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        let path = self.path("chmod", file_id)?;
        self.run("chmod", move |client| client.chmod(&path, mode))
            .await
    }

    async fn chown(
        &self,
        file_id: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), FsError> {
        let path = self.path("chown", file_id)?;
        self.run("chown", move |client| client.chown(&path, uid, gid))
            .await
    }
}

#[async_trait]
impl BackendXattr for DistributedBackend {
    async fn getxattr(&self, file_id: &str, name: &str) -> Result<Bytes, FsError> {
        let path = self.path("getxattr", file_id)?;
        let name = name.to_string();
        self.run("getxattr", move |client| client.getxattr(&path, &name))
            .await
            .map(Bytes::from)
    }

    async fn setxattr(
        &self,
        file_id: &str,
        name: &str,
        value: Bytes,
        mode: XattrMode,
    ) -> Result<(), FsError> {
        let path = self.path("setxattr", file_id)?;
        let name = name.to_string();
        self.run("setxattr", move |client| {
            client.setxattr(&path, &name, &value, mode)
        })
        .await
    }

    async fn removexattr(&self, file_id: &str, name: &str) -> Result<(), FsError> {
        let path = self.path("removexattr", file_id)?;
        let name = name.to_string();
        self.run("removexattr", move |client| client.removexattr(&path, &name))
            .await
    }

    async fn listxattr(&self, file_id: &str) -> Result<Vec<String>, FsError> {
        let path = self.path("listxattr", file_id)?;
        self.run("listxattr", move |client| client.listxattr(&path))
            .await
    }
}

type SharedFile = Arc<RwLock<Option<Box<dyn DfsFile>>>>;

fn with_file<T>(
    file: &RwLock<Option<Box<dyn DfsFile>>>,
    call: impl FnOnce(&dyn DfsFile) -> DfsResult<T>,
) -> DfsResult<T> {
    let guard = file.read();
    let file = guard.as_deref().ok_or(libc::EBADF)?;
    call(file)
}

/// Writes every fragment back to back starting at `offset`, resuming
/// short writes.
fn write_fragments(file: &dyn DfsFile, offset: u64, fragments: &[Bytes]) -> DfsResult<usize> {
    let mut position = offset;
    let mut written = 0;
    for fragment in fragments {
        let mut rest: &[u8] = fragment;
        while !rest.is_empty() {
            let n = file.pwrite(position, rest)?;
            if n == 0 {
                return Err(libc::EIO);
            }
            rest = &rest[n..];
            position += n as u64;
            written += n;
        }
    }
    Ok(written)
}

/// A file opened by [`DistributedBackend`].
pub struct DistributedFileHandle {
    file_id: String,
    identity: Identity,
    file: SharedFile,
    needs_release: ReleaseFlag,
    backend: DistributedBackend,
}

#[async_trait]
impl FileHandle for DistributedFileHandle {
    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn timeout(&self) -> Duration {
        self.backend.config.timeout
    }

    async fn read(&self, offset: u64, size: usize) -> Result<Bytes, FsError> {
        let timer = TimerGuard::start(self.backend.metrics.as_ref(), format!("{METRIC_PREFIX}.read"));
        let file = Arc::clone(&self.file);
        let data = self
            .backend
            .run_as("read", self.identity, move |_| {
                with_file(&file, |f| f.pread(offset, size))
            })
            .await?;
        timer.stop(data.len() as u64);
        Ok(Bytes::from(data))
    }

    async fn write(&self, offset: u64, buf: BufChain) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let timer = TimerGuard::start(self.backend.metrics.as_ref(), format!("{METRIC_PREFIX}.write"));
        let file = Arc::clone(&self.file);
        let written = self
            .backend
            .run_as("write", self.identity, move |_| {
                with_file(&file, |f| write_fragments(f, offset, buf.fragments()))
            })
            .await?;
        timer.stop(written as u64);
        Ok(written)
    }

    async fn flush(&self) -> Result<(), FsError> {
        self.backend.run_as("flush", self.identity, |_| Ok(())).await
    }

    async fn fsync(&self, data_only: bool) -> Result<(), FsError> {
        let file = Arc::clone(&self.file);
        self.backend
            .run_as("fsync", self.identity, move |_| {
                with_file(&file, |f| f.fsync(data_only))
            })
            .await
    }

    async fn release(&self) -> Result<(), FsError> {
        if !self.needs_release.take() {
            return Ok(());
        }
        let file = Arc::clone(&self.file);
        let client = Arc::clone(&self.backend.client);
        let identity = self.identity;
        let file_id = self.file_id.clone();
        submit(self.backend.pool.as_ref(), "release", move || {
            let ctx = UserCtx::enter(client.identity(), identity);
            let valid = ctx.valid();
            if let Some(file) = file.write().take() {
                close_logged(&file_id, file.as_ref());
            }
            drop(ctx);
            if valid {
                Ok(())
            } else {
                Err(FsError::domain("release"))
            }
        })
        .await
    }
}

fn close_logged(file_id: &str, file: &dyn DfsFile) {
    if let Err(errno) = file.close() {
        warn!(file_id, code = %ErrorCode::from_errno(errno), "failed to release file");
    }
}

impl Drop for DistributedFileHandle {
    fn drop(&mut self) {
        if self.needs_release.take() {
            if let Some(file) = self.file.write().take() {
                close_logged(&self.file_id, file.as_ref());
            }
        }
    }
}

impl fmt::Debug for DistributedFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedFileHandle")
            .field("file_id", &self.file_id)
            .field("identity", &self.identity)
            .field("open", &self.needs_release.is_open())
            .finish()
    }
}
