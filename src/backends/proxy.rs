//! Proxy driver.
//!
//! Forwards each operation over a [`ProxyChannel`] to a remote party that
//! owns the storage. Nothing touches storage locally and no identity is
//! assumed; the remote side enforces both. Opening a file is local: the
//! returned handle carries the open parameters and sends them along with
//! every I/O request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

use crate::config::{get_param, timeout_param};
use crate::{
    Attributes, BackendAttr, BackendDir, BackendLink, BackendOpen, BackendPermissions,
    BackendWrite, BackendXattr, BufChain, DEFAULT_TIMEOUT, ErrorCode, FileHandle, FsError,
    NodeKind, OpenFlags, Params, XattrMode,
};

/// An operation sent to the remote party.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum ProxyRequest {
    GetAttr { file_id: String },
    Access { file_id: String, mask: i32 },
    ReadDir { file_id: String, offset: u64, count: usize },
    Mkdir { file_id: String, mode: u32 },
    Rmdir { file_id: String },
    Mknod { file_id: String, mode: u32, kind: NodeKind, rdev: u64 },
    Unlink { file_id: String, current_size: u64 },
    Rename { from: String, to: String },
    Truncate { file_id: String, size: u64, current_size: u64 },
    Symlink { from: String, to: String },
    Link { from: String, to: String },
    ReadLink { file_id: String },
    Chmod { file_id: String, mode: u32 },
    Chown { file_id: String, uid: Option<u32>, gid: Option<u32> },
    GetXattr { file_id: String, name: String },
    SetXattr { file_id: String, name: String, value: Bytes, mode: XattrMode },
    RemoveXattr { file_id: String, name: String },
    ListXattr { file_id: String },
    Read { file_id: String, params: Params, offset: u64, size: usize },
    /// One or more writes applied in order.
    Write { file_id: String, params: Params, writes: Vec<(u64, Bytes)> },
    Fsync { file_id: String, params: Params, data_only: bool },
}

impl ProxyRequest {
    /// Operation name used in errors and logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::GetAttr { .. } => "getattr",
            Self::Access { .. } => "access",
            Self::ReadDir { .. } => "readdir",
            Self::Mkdir { .. } => "mkdir",
            Self::Rmdir { .. } => "rmdir",
            Self::Mknod { .. } => "mknod",
            Self::Unlink { .. } => "unlink",
            Self::Rename { .. } => "rename",
            Self::Truncate { .. } => "truncate",
            Self::Symlink { .. } => "symlink",
            Self::Link { .. } => "link",
            Self::ReadLink { .. } => "readlink",
            Self::Chmod { .. } => "chmod",
            Self::Chown { .. } => "chown",
            Self::GetXattr { .. } => "getxattr",
            Self::SetXattr { .. } => "setxattr",
            Self::RemoveXattr { .. } => "removexattr",
            Self::ListXattr { .. } => "listxattr",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Fsync { .. } => "fsync",
        }
    }
}

/// The remote party's answer to a [`ProxyRequest`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProxyResponse {
    /// Completed with nothing to return.
    Done,
    /// File attributes.
    Attributes(Attributes),
    /// Directory entries or attribute names.
    Names(Vec<String>),
    /// Symbolic link target.
    Target(String),
    /// File or attribute contents.
    Data(Bytes),
    /// Bytes written.
    Written(usize),
}

fn unexpected(operation: &'static str, response: &ProxyResponse) -> FsError {
    FsError::with_message(
        ErrorCode::Io,
        operation,
        format!("unexpected response {response:?}"),
    )
}

impl ProxyResponse {
    fn into_done(self, operation: &'static str) -> Result<(), FsError> {
        match self {
            Self::Done => Ok(()),
            other => Err(unexpected(operation, &other)),
        }
    }

    fn into_attributes(self, operation: &'static str) -> Result<Attributes, FsError> {
        match self {
            Self::Attributes(attributes) => Ok(attributes),
            other => Err(unexpected(operation, &other)),
        }
    }

    fn into_names(self, operation: &'static str) -> Result<Vec<String>, FsError> {
        match self {
            Self::Names(names) => Ok(names),
            other => Err(unexpected(operation, &other)),
        }
    }

    fn into_target(self, operation: &'static str) -> Result<String, FsError> {
        match self {
            Self::Target(target) => Ok(target),
            other => Err(unexpected(operation, &other)),
        }
    }

    fn into_data(self, operation: &'static str) -> Result<Bytes, FsError> {
        match self {
            Self::Data(data) => Ok(data),
            other => Err(unexpected(operation, &other)),
        }
    }

    fn into_written(self, operation: &'static str) -> Result<usize, FsError> {
        match self {
            Self::Written(n) => Ok(n),
            other => Err(unexpected(operation, &other)),
        }
    }
}

/// Transport to the party that owns the storage.
///
/// Remote failures come back as [`FsError`] in the normalized taxonomy.
#[async_trait]
pub trait ProxyChannel: Send + Sync {
    /// Sends `request` for `storage_id` and waits for the answer.
    ///
    /// `timeout` is advisory; the driver enforces it as well.
    async fn communicate(
        &self,
        storage_id: &str,
        request: ProxyRequest,
        timeout: Duration,
    ) -> Result<ProxyResponse, FsError>;
}

/// Configuration of a [`ProxyBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProxyConfig {
    /// Storage the remote party should act on.
    pub storage_id: String,
    /// Deadline for each request.
    pub timeout: Duration,
}

impl ProxyConfig {
    /// Configuration with the default timeout.
    pub fn new(storage_id: impl Into<String>) -> Self {
        Self {
            storage_id: storage_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Parses `storageId` and `timeout`.
    pub fn from_params(params: &Params) -> Result<Self, FsError> {
        Ok(Self {
            storage_id: get_param(params, "storageId")?,
            timeout: timeout_param(params)?,
        })
    }
}

/// Driver that forwards every operation to a remote party.
#[derive(Clone)]
pub struct ProxyBackend {
    config: Arc<ProxyConfig>,
    channel: Arc<dyn ProxyChannel>,
}

impl ProxyBackend {
    /// Creates a driver sending requests over `channel`.
    pub fn new(config: ProxyConfig, channel: Arc<dyn ProxyChannel>) -> Self {
        Self {
            config: Arc::new(config),
            channel,
        }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    async fn call(&self, request: ProxyRequest) -> Result<ProxyResponse, FsError> {
        communicate(self.channel.as_ref(), &self.config, request).await
    }
}

async fn communicate(
    channel: &dyn ProxyChannel,
    config: &ProxyConfig,
    request: ProxyRequest,
) -> Result<ProxyResponse, FsError> {
    let operation = request.operation();
    trace!(storage_id = %config.storage_id, operation, "forwarding request");
    let pending = channel.communicate(&config.storage_id, request, config.timeout);
    match tokio::time::timeout(config.timeout, pending).await {
        Ok(response) => response,
        Err(_) => {
            debug!(storage_id = %config.storage_id, operation, "request timed out");
            Err(FsError::with_message(
                ErrorCode::TimedOut,
                operation,
                format!("no response within {:?}", config.timeout),
            ))
        }
    }
}

#[async_trait]
impl BackendOpen for ProxyBackend {
    async fn open(
        &self,
        file_id: &str,
        _flags: OpenFlags,
        params: &Params,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        Ok(Box::new(ProxyFileHandle {
            file_id: file_id.to_string(),
            params: params.clone(),
            config: Arc::clone(&self.config),
            channel: Arc::clone(&self.channel),
        }))
    }
}

#[async_trait]
impl BackendAttr for ProxyBackend {
    async fn getattr(&self, file_id: &str) -> Result<Attributes, FsError> {
        self.call(ProxyRequest::GetAttr {
            file_id: file_id.to_string(),
        })
        .await?
        .into_attributes("getattr")
    }

    async fn access(&self, file_id: &str, mask: i32) -> Result<(), FsError> {
        self.call(ProxyRequest::Access {
            file_id: file_id.to_string(),
            mask,
        })
        .await?
        .into_done("access")
    }
}

#[async_trait]
impl BackendDir for ProxyBackend {
    async fn readdir(
        &self,
        file_id: &str,
        offset: u64,
        count: usize,
    ) -> Result<Vec<String>, FsError> {
        self.call(ProxyRequest::ReadDir {
            file_id: file_id.to_string(),
            offset,
            count,
        })
        .await?
        .into_names("readdir")
    }

    async fn mkdir(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        self.call(ProxyRequest::Mkdir {
            file_id: file_id.to_string(),
            mode,
        })
        .await?
        .into_done("mkdir")
    }

    async fn rmdir(&self, file_id: &str) -> Result<(), FsError> {
        self.call(ProxyRequest::Rmdir {
            file_id: file_id.to_string(),
        })
        .await?
        .into_done("rmdir")
    }

    async fn mknod(
        &self,
        file_id: &str,
        mode: u32,
        kind: NodeKind,
        rdev: u64,
    ) -> Result<(), FsError> {
        self.call(ProxyRequest::Mknod {
            file_id: file_id.to_string(),
            mode,
            kind,
            rdev,
        })
        .await?
        .into_done("mknod")
    }
}

#[async_trait]
impl BackendWrite for ProxyBackend {
    async fn unlink(&self, file_id: &str, current_size: u64) -> Result<(), FsError> {
        self.call(ProxyRequest::Unlink {
            file_id: file_id.to_string(),
            current_size,
        })
        .await?
        .into_done("unlink")
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.call(ProxyRequest::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await?
        .into_done("rename")
    }

    async fn truncate(&self, file_id: &str, size: u64, current_size: u64) -> Result<(), FsError> {
        self.call(ProxyRequest::Truncate {
            file_id: file_id.to_string(),
            size,
            current_size,
        })
        .await?
        .into_done("truncate")
    }
}

#[async_trait]
impl BackendLink for ProxyBackend {
    async fn symlink(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.call(ProxyRequest::Symlink {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await?
        .into_done("symlink")
    }

    async fn link(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.call(ProxyRequest::Link {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await?
        .into_done("link")
    }

    async fn readlink(&self, file_id: &str) -> Result<String, FsError> {
        self.call(ProxyRequest::ReadLink {
            file_id: file_id.to_string(),
        })
        .await?
        .into_target("readlink")
    }
}

#[async_trait]
impl BackendPermissions for ProxyBackend {
    async fn chmod(&self, file_id: &str, mode: u32) -> Result<(), FsError> {
        self.call(ProxyRequest::Chmod {
            file_id: file_id.to_string(),
            mode,
        })
        .await?
        .into_done("chmod")
    }

    async fn chown(
        &self,
        file_id: &str,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), FsError> {
        self.call(ProxyRequest::Chown {
            file_id: file_id.to_string(),
            uid,
            gid,
        })
        .await?
        .into_done("chown")
    }
}

#[async_trait]
impl BackendXattr for ProxyBackend {
    async fn getxattr(&self, file_id: &str, name: &str) -> Result<Bytes, FsError> {
        self.call(ProxyRequest::GetXattr {
            file_id: file_id.to_string(),
            name: name.to_string(),
        })
        .await?
        .into_data("getxattr")
    }

    async fn setxattr(
        &self,
        file_id: &str,
        name: &str,
        value: Bytes,
        mode: XattrMode,
    ) -> Result<(), FsError> {
        self.call(ProxyRequest::SetXattr {
            file_id: file_id.to_string(),
            name: name.to_string(),
            value,
            mode,
        })
        .await?
        .into_done("setxattr")
    }

    async fn removexattr(&self, file_id: &str, name: &str) -> Result<(), FsError> {
        self.call(ProxyRequest::RemoveXattr {
            file_id: file_id.to_string(),
            name: name.to_string(),
        })
        .await?
        .into_done("removexattr")
    }

    async fn listxattr(&self, file_id: &str) -> Result<Vec<String>, FsError> {
        self.call(ProxyRequest::ListXattr {
            file_id: file_id.to_string(),
        })
        .await?
        .into_names("listxattr")
    }
}

/// A file opened through [`ProxyBackend`].
///
/// Holds no remote state; releasing it sends nothing.
pub struct ProxyFileHandle {
    file_id: String,
    params: Params,
    config: Arc<ProxyConfig>,
    channel: Arc<dyn ProxyChannel>,
}

impl ProxyFileHandle {
    /// Parameters the file was opened with.
    pub fn params(&self) -> &Params {
        &self.params
    }

    async fn call(&self, request: ProxyRequest) -> Result<ProxyResponse, FsError> {
        communicate(self.channel.as_ref(), &self.config, request).await
    }
}

#[async_trait]
impl FileHandle for ProxyFileHandle {
    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn read(&self, offset: u64, size: usize) -> Result<Bytes, FsError> {
        self.call(ProxyRequest::Read {
            file_id: self.file_id.clone(),
            params: self.params.clone(),
            offset,
            size,
        })
        .await?
        .into_data("read")
    }

    async fn write(&self, offset: u64, buf: BufChain) -> Result<usize, FsError> {
        self.multiwrite(vec![(offset, buf)]).await
    }

    /// Sends all writes in a single request.
    async fn multiwrite(&self, writes: Vec<(u64, BufChain)>) -> Result<usize, FsError> {
        let writes: Vec<(u64, Bytes)> = writes
            .into_iter()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(offset, buf)| (offset, buf.into_bytes()))
            .collect();
        if writes.is_empty() {
            return Ok(0);
        }
        self.call(ProxyRequest::Write {
            file_id: self.file_id.clone(),
            params: self.params.clone(),
            writes,
        })
        .await?
        .into_written("write")
    }

    async fn fsync(&self, data_only: bool) -> Result<(), FsError> {
        self.call(ProxyRequest::Fsync {
            file_id: self.file_id.clone(),
            params: self.params.clone(),
            data_only,
        })
        .await?
        .into_done("fsync")
    }
}

impl std::fmt::Debug for ProxyFileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyFileHandle")
            .field("file_id", &self.file_id)
            .field("storage_id", &self.config.storage_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<ProxyRequest>>,
    }

    #[async_trait]
    impl ProxyChannel for Recording {
        async fn communicate(
            &self,
            storage_id: &str,
            request: ProxyRequest,
            _timeout: Duration,
        ) -> Result<ProxyResponse, FsError> {
            assert_eq!(storage_id, "s1");
            let response = match &request {
                ProxyRequest::Write { writes, .. } => {
                    ProxyResponse::Written(writes.iter().map(|(_, b)| b.len()).sum())
                }
                ProxyRequest::GetAttr { .. } => ProxyResponse::Names(vec![]),
                _ => ProxyResponse::Done,
            };
            self.requests.lock().push(request);
            Ok(response)
        }
    }

    struct Silent;

    #[async_trait]
    impl ProxyChannel for Silent {
        async fn communicate(
            &self,
            _storage_id: &str,
            _request: ProxyRequest,
            _timeout: Duration,
        ) -> Result<ProxyResponse, FsError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ProxyResponse::Done)
        }
    }

    fn backend(channel: Arc<dyn ProxyChannel>, timeout: Duration) -> ProxyBackend {
        ProxyBackend::new(
            ProxyConfig {
                storage_id: "s1".to_string(),
                timeout,
            },
            channel,
        )
    }

    #[tokio::test]
    async fn multiwrite_is_one_request() {
        let channel = Arc::new(Recording::default());
        let proxy = backend(channel.clone(), DEFAULT_TIMEOUT);
        let handle = proxy.open("f", OpenFlags::WRITE, &Params::new()).await.unwrap();

        let written = handle
            .multiwrite(vec![
                (0, BufChain::from(&b"abc"[..])),
                (10, BufChain::new()),
                (3, BufChain::from(&b"de"[..])),
            ])
            .await
            .unwrap();
        assert_eq!(written, 5);

        let requests = channel.requests.lock();
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ProxyRequest::Write { writes, .. } => assert_eq!(writes.len(), 2),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_write_sends_nothing() {
        let channel = Arc::new(Recording::default());
        let proxy = backend(channel.clone(), DEFAULT_TIMEOUT);
        let handle = proxy.open("f", OpenFlags::WRITE, &Params::new()).await.unwrap();
        assert_eq!(handle.write(0, BufChain::new()).await.unwrap(), 0);
        assert!(channel.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn wrong_response_is_io_error() {
        let proxy = backend(Arc::new(Recording::default()), DEFAULT_TIMEOUT);
        let err = proxy.getattr("f").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.operation(), "getattr");
    }

    #[tokio::test]
    async fn slow_channel_times_out() {
        let proxy = backend(Arc::new(Silent), Duration::from_millis(20));
        let err = proxy.rmdir("d").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TimedOut);
        assert_eq!(err.operation(), "rmdir");
    }

    #[test]
    fn config_requires_storage_id() {
        let err = ProxyConfig::from_params(&Params::new()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}
