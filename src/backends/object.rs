//! Object-storage driver.
//!
//! File identifiers are object keys in one bucket. Objects have no owner,
//! mode, link or extended-attribute model, so those operations fail with
//! [`ErrorCode::NotSupported`] and no identity is ever assumed. Requests go
//! through an [`ObjectClient`] supplied by the caller (an SDK wrapper in
//! production, an in-memory store in tests).
//!
//! Reads are ranged gets sized to exactly the requested window. Writes are
//! whole-object puts, so only offset `0` is accepted.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::config::{get_param, get_param_or, timeout_param};
use crate::metrics::{SharedMetrics, TimerGuard, noop};
use crate::types::{S_IFDIR, S_IFREG};
use crate::{
    Attributes, BackendAttr, BackendDir, BackendLink, BackendOpen, BackendPermissions,
    BackendWrite, BackendXattr, BufChain, DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT, ErrorCode,
    ExecutionContext, FileHandle, FsError, NodeKind, OpenFlags, Params, RetryPolicy, retry_call,
    submit,
};

const METRIC_PREFIX: &str = "comp.helpers.mod.s3";

/// Largest number of keys a single batch-delete request may carry.
pub const MAX_DELETE_OBJECTS: usize = 1000;

/// Largest object a single put may create (5 GiB).
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Page size used when listing keys.
const LIST_PAGE: usize = 1000;

const DEFAULT_REGION: &str = "us-east-1";

const REGIONS: &[&str] = &[
    "us-east-2",
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "ap-south-1",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "sa-east-1",
];

/// Error kinds reported by an object-storage client.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectErrorKind {
    /// Credentials lack permission for the request.
    AccessDenied,
    /// A request parameter has an invalid value.
    InvalidParameterValue,
    /// Request parameters cannot be combined.
    InvalidParameterCombination,
    /// A query parameter is malformed.
    InvalidQueryParameter,
    /// The requested action does not exist.
    MissingAction,
    /// The requested byte range lies outside the object.
    InvalidRange,
    /// The bucket does not exist.
    NoSuchBucket,
    /// The key does not exist.
    NoSuchKey,
    /// Some other resource does not exist.
    ResourceNotFound,
    /// The service is temporarily unavailable.
    ServiceUnavailable,
    /// The request rate was throttled.
    Throttling,
    /// The service asked the client to slow down.
    SlowDown,
    /// The service failed internally.
    InternalFailure,
    /// The connection to the service failed.
    NetworkConnection,
    /// The signed request expired before it was processed.
    RequestExpired,
    /// The service reported an unknown error.
    Unknown,
    /// Anything the client could not classify.
    Other,
}

impl ObjectErrorKind {
    /// Normalized code for this kind. Unlisted kinds become [`ErrorCode::Io`].
    pub fn code(self) -> ErrorCode {
        match self {
            Self::InvalidParameterValue => ErrorCode::InvalidArgument,
            Self::MissingAction => ErrorCode::NotSupported,
            Self::ServiceUnavailable => ErrorCode::HostUnreachable,
            Self::NetworkConnection => ErrorCode::NetworkUnreachable,
            Self::RequestExpired => ErrorCode::TimedOut,
            Self::AccessDenied => ErrorCode::PermissionDenied,
            Self::Unknown | Self::NoSuchBucket | Self::NoSuchKey | Self::ResourceNotFound => {
                ErrorCode::NotFound
            }
            _ => ErrorCode::Io,
        }
    }

    /// Whether a request failing with this kind may succeed when repeated.
    ///
    /// Not-found and invalid-parameter kinds are terminal.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::InternalFailure
                | Self::RequestExpired
                | Self::ServiceUnavailable
                | Self::SlowDown
                | Self::Throttling
                | Self::NetworkConnection
        )
    }
}

/// A failed object-storage request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ObjectError {
    /// What went wrong.
    pub kind: ObjectErrorKind,
    /// Message from the service.
    pub message: String,
}

impl ObjectError {
    /// Creates an error.
    pub fn new(kind: ObjectErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Translates into the normalized error for `operation`.
    pub fn to_fs_error(&self, operation: &'static str) -> FsError {
        FsError::with_message(self.kind.code(), operation, self.message.clone())
    }
}

/// Size and modification time of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    /// Keys in lexicographic order.
    pub keys: Vec<String>,
    /// Marker for the next page; `None` on the last page.
    pub next_marker: Option<String>,
}

/// Blocking request/response interface of an object-storage client.
///
/// Calls are made from execution-context workers, never from async tasks.
pub trait ObjectClient: Send + Sync {
    /// Fetches the bytes selected by an HTTP `range` header value.
    fn get_object(&self, bucket: &str, key: &str, range: &str) -> Result<Bytes, ObjectError>;

    /// Stores `body` as the whole content of `key`.
    fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), ObjectError>;

    /// Returns size and modification time of `key`.
    fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, ObjectError>;

    /// Deletes at most [`MAX_DELETE_OBJECTS`] keys in one request.
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), ObjectError>;

    /// Lists up to `max_keys` keys starting with `prefix`, after `marker`.
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: Option<&str>,
        max_keys: usize,
    ) -> Result<ObjectListing, ObjectError>;
}

/// `range` header value selecting `size` bytes at `offset`.
///
/// `None` when `size` is zero or the window ends past `u64::MAX`.
pub fn byte_range(offset: u64, size: usize) -> Option<String> {
    let last = offset.checked_add((size as u64).checked_sub(1)?)?;
    Some(format!("bytes={offset}-{last}"))
}

/// Region whose name appears in `hostname`, or `us-east-1`.
pub fn region_for_host(hostname: &str) -> &'static str {
    REGIONS
        .iter()
        .copied()
        .find(|region| hostname.contains(region))
        .unwrap_or(DEFAULT_REGION)
}

/// Transport scheme of the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Https => "https",
        })
    }
}

/// Configuration of an [`ObjectBackend`].
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectConfig {
    /// Endpoint host (and optional port).
    pub hostname: String,
    /// Bucket holding the objects.
    pub bucket: String,
    /// Access key id.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: String,
    /// Endpoint scheme.
    pub scheme: Scheme,
    /// Timeout advertised on open handles.
    pub timeout: Duration,
    /// Retry policy for requests.
    pub retry: RetryPolicy,
    /// Largest size `truncate` may rewrite an object to.
    pub max_object_size: u64,
}

impl ObjectConfig {
    /// Configuration with default scheme, timeout and retry policy.
    pub fn new(
        hostname: impl Into<String>,
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            scheme: Scheme::default(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            max_object_size: MAX_OBJECT_SIZE,
        }
    }

    /// Parses `hostname`, `bucketName`, `accessKey`, `secretKey`, `scheme`,
    /// `timeout`, `retryAttempts` and `maxObjectSize`.
    pub fn from_params(params: &Params) -> Result<Self, FsError> {
        let scheme = match get_param_or(params, "scheme", "https".to_string())?.as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(FsError::with_message(
                    ErrorCode::InvalidArgument,
                    "config",
                    format!("invalid value '{other}' for parameter 'scheme'"),
                ));
            }
        };
        let attempts = get_param_or(params, "retryAttempts", DEFAULT_RETRY_ATTEMPTS)?;
        Ok(Self {
            hostname: get_param(params, "hostname")?,
            bucket: get_param(params, "bucketName")?,
            access_key: get_param(params, "accessKey")?,
            secret_key: get_param(params, "secretKey")?,
            scheme,
            timeout: timeout_param(params)?,
            retry: RetryPolicy::default().with_attempts(attempts),
            max_object_size: get_param_or(params, "maxObjectSize", MAX_OBJECT_SIZE)?,
        })
    }

    /// Region derived from the hostname.
    pub fn region(&self) -> &'static str {
        region_for_host(&self.hostname)
    }

    /// Endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.scheme, self.hostname)
    }
}

impl fmt::Debug for ObjectConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectConfig")
            .field("hostname", &self.hostname)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("max_object_size", &self.max_object_size)
            .finish()
    }
}

/// Driver for one bucket of an object store.
#[derive(Clone)]
pub struct ObjectBackend {
    config: Arc<ObjectConfig>,
    client: Arc<dyn ObjectClient>,
    executor: Arc<dyn ExecutionContext>,
    metrics: SharedMetrics,
}

impl ObjectBackend {
    /// Creates a driver issuing requests through `client` on `executor`.
    pub fn new(
        config: ObjectConfig,
        client: Arc<dyn ObjectClient>,
        executor: Arc<dyn ExecutionContext>,
    ) -> Self {
        debug!(
            endpoint = %config.endpoint(),
            region = config.region(),
            bucket = %config.bucket,
            "created object storage backend"
        );
        Self {
            config: Arc::new(config),
            client,
            executor,
            metrics: noop(),
        }
    }

    /// Reports metrics to `metrics`.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ObjectConfig {
        &self.config
    }

    /// Issues `call` on the executor, retrying transient failures.
    fn request<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> impl Future<Output = Result<T, FsError>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnMut(&dyn ObjectClient, &str) -> Result<T, ObjectError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        submit(self.executor.as_ref(), operation, move || {
            let mut call = call;
            retry_call(
                &config.retry,
                &format!("{METRIC_PREFIX}.{operation}"),
                metrics.as_ref(),
                |e: &ObjectError| e.kind.is_retryable(),
                || call(client.as_ref(), &config.bucket),
            )
            .map_err(|e| {
                debug!(operation, error = %e, "object storage request failed");
                e.to_fs_error(operation)
            })
        })
    }

    /// Deletes `keys` in batches of at most [`MAX_DELETE_OBJECTS`].
    ///
    /// Every batch is attempted even if an earlier one fails. The returned
    /// error carries the code of the first failed batch and how many keys
    /// were left in place.
    pub async fn delete_objects(&self, keys: Vec<String>) -> Result<(), FsError> {
        if keys.is_empty() {
            return Ok(());
        }
        let client = Arc::clone(&self.client);
        let config = Arc::clone(&self.config);
        let metrics = Arc::clone(&self.metrics);
        submit(self.executor.as_ref(), "DeleteObjects", move || {
            let name = format!("{METRIC_PREFIX}.DeleteObjects");
            let mut first_error: Option<ObjectError> = None;
            let mut failed = 0;
            for batch in keys.chunks(MAX_DELETE_OBJECTS) {
                let outcome = retry_call(
                    &config.retry,
                    &name,
                    metrics.as_ref(),
                    |e: &ObjectError| e.kind.is_retryable(),
                    || client.delete_objects(&config.bucket, batch),
                );
                if let Err(e) = outcome {
                    debug!(keys = batch.len(), error = %e, "batch delete failed");
                    failed += batch.len();
                    first_error.get_or_insert(e);
                }
            }
            match first_error {
                None => Ok(()),
                Some(e) => Err(FsError::with_message(
                    e.kind.code(),
                    "DeleteObjects",
                    format!("{failed} of {} keys not deleted: {}", keys.len(), e.message),
                )),
            }
        })
        .await
    }

    async fn get(&self, key: String, offset: u64, size: usize) -> Result<Bytes, FsError> {
        if size == 0 {
            return Ok(Bytes::new());
        }
        let range = byte_range(offset, size).ok_or_else(|| {
            FsError::with_message(
                ErrorCode::InvalidArgument,
                "read",
                format!("{size} bytes at offset {offset} overflow the object range"),
            )
        })?;
        self.request("GetObject", move |client, bucket| {
            match client.get_object(bucket, &key, &range) {
                // A window starting past the end of the object is empty.
                Err(e) if e.kind == ObjectErrorKind::InvalidRange => Ok(Bytes::new()),
                other => other,
            }
        })
        .await
    }

    async fn put(&self, key: String, body: Bytes) -> Result<(), FsError> {
        self.request("PutObject", move |client, bucket| {
            client.put_object(bucket, &key, body.clone())
        })
        .await
    }

    async fn list_all(&self, prefix: String) -> Result<Vec<String>, FsError> {
        self.request("ListObjects", move |client, bucket| {
            let mut keys = Vec::new();
            let mut marker: Option<String> = None;
            loop {
                let page = client.list_objects(bucket, &prefix, marker.as_deref(), LIST_PAGE)?;
                keys.extend(page.keys);
                match page.next_marker {
                    Some(next) => marker = Some(next),
                    None => return Ok(keys),
                }
            }
        })
        .await
    }
}

fn object_key(file_id: &str) -> String {
    file_id.trim_start_matches('/').to_string()
}

fn dir_prefix(key: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

fn file_attributes(meta: ObjectMeta) -> Attributes {
    Attributes {
        mode: S_IFREG | 0o664,
        size: meta.size,
        blocks: meta.size.div_ceil(512),
        atime: meta.modified,
        mtime: meta.modified,
        ctime: meta.modified,
        ..Attributes::default()
    }
}

fn dir_attributes() -> Attributes {
    Attributes {
        mode: S_IFDIR | 0o775,
        nlink: 2,
        ..Attributes::default()
    }
}

#[async_trait]
impl BackendOpen for ObjectBackend {
    async fn open(
        &self,
        file_id: &str,
        flags: OpenFlags,
        _params: &Params,
    ) -> Result<Box<dyn FileHandle>, FsError> {
        trace!(file_id, ?flags, "open object");
        Ok(Box::new(ObjectFileHandle {
            file_id: file_id.to_string(),
            key: object_key(file_id),
            backend: self.clone(),
        }))
    }
}

#[async_trait]
impl BackendAttr for ObjectBackend {
    async fn getattr(&self, file_id: &str) -> Result<Attributes, FsError> {
        let key = object_key(file_id);
        if key.is_empty() {
            return Ok(dir_attributes());
        }
        let head_key = key.clone();
        let head = self
            .request("HeadObject", move |client, bucket| client.head_object(bucket, &head_key))
            .await;
        match head {
            Ok(meta) => Ok(file_attributes(meta)),
            Err(e) if e.code() == ErrorCode::NotFound => {
                // A key prefix with children behaves as a directory.
                let prefix = dir_prefix(&key);
                let children = self
                    .request("ListObjects", move |client, bucket| {
                        client.list_objects(bucket, &prefix, None, 1)
                    })
                    .await?;
                if children.keys.is_empty() {
                    Err(e)
                } else {
                    Ok(dir_attributes())
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn access(&self, file_id: &str, _mask: i32) -> Result<(), FsError> {
        self.getattr(file_id).await.map(|_| ())
    }
}

#[async_trait]
impl BackendDir for ObjectBackend {
    async fn readdir(
        &self,
        file_id: &str,
        offset: u64,
        count: usize,
    ) -> Result<Vec<String>, FsError> {
        let prefix = dir_prefix(&object_key(file_id));
        let keys = self.list_all(prefix.clone()).await?;
        let children: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(crate::dirlist::paginate(children, offset, count))
    }

    async fn mknod(
        &self,
        file_id: &str,
        _mode: u32,
        kind: NodeKind,
        _rdev: u64,
    ) -> Result<(), FsError> {
        if kind != NodeKind::Regular {
            return Err(FsError::not_supported("mknod"));
        }
        self.put(object_key(file_id), Bytes::new()).await
    }
}

#[async_trait]
impl BackendWrite for ObjectBackend {
    async fn unlink(&self, file_id: &str, _current_size: u64) -> Result<(), FsError> {
        self.delete_objects(vec![object_key(file_id)]).await
    }

    /// Rewrites the object with its first `size` bytes, zero-extended.
    async fn truncate(&self, file_id: &str, size: u64, current_size: u64) -> Result<(), FsError> {
        if size == current_size {
            return Ok(());
        }
        if size > self.config.max_object_size {
            return Err(FsError::with_message(
                ErrorCode::InvalidArgument,
                "truncate",
                format!("size {size} exceeds the {} byte object limit", self.config.max_object_size),
            ));
        }
        let key = object_key(file_id);
        let keep = size.min(current_size);
        let prefix = if keep == 0 {
            Bytes::new()
        } else {
            let len = usize::try_from(keep).map_err(|_| FsError::new(ErrorCode::InvalidArgument, "truncate"))?;
            self.get(key.clone(), 0, len).await?
        };
        let total = usize::try_from(size).map_err(|_| FsError::new(ErrorCode::InvalidArgument, "truncate"))?;
        let mut body = BytesMut::with_capacity(total);
        body.extend_from_slice(&prefix);
        body.resize(total, 0);
        self.put(key, body.freeze()).await
    }
}

#[async_trait]
impl BackendLink for ObjectBackend {}

#[async_trait]
impl BackendPermissions for ObjectBackend {}

#[async_trait]
impl BackendXattr for ObjectBackend {}

/// Handle to one object. Holds no native resource.
pub struct ObjectFileHandle {
    file_id: String,
    key: String,
    backend: ObjectBackend,
}

#[async_trait]
impl FileHandle for ObjectFileHandle {
    fn file_id(&self) -> &str {
        &self.file_id
    }

    fn timeout(&self) -> Duration {
        self.backend.config.timeout
    }

    async fn read(&self, offset: u64, size: usize) -> Result<Bytes, FsError> {
        let metrics = Arc::clone(&self.backend.metrics);
        let timer = TimerGuard::start(metrics.as_ref(), format!("{METRIC_PREFIX}.read"));
        match self.backend.get(self.key.clone(), offset, size).await {
            Ok(data) => {
                timer.stop(data.len() as u64);
                Ok(data)
            }
            Err(e) => {
                metrics.counter_inc(&format!("{METRIC_PREFIX}.errors.read"));
                Err(e)
            }
        }
    }

    async fn write(&self, offset: u64, buf: BufChain) -> Result<usize, FsError> {
        if offset != 0 {
            return Err(FsError::with_message(
                ErrorCode::InvalidArgument,
                "write",
                "objects can only be written whole, at offset 0",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let metrics = Arc::clone(&self.backend.metrics);
        let timer = TimerGuard::start(metrics.as_ref(), format!("{METRIC_PREFIX}.write"));
        let body = buf.into_bytes();
        let size = body.len();
        match self.backend.put(self.key.clone(), body).await {
            Ok(()) => {
                timer.stop(size as u64);
                Ok(size)
            }
            Err(e) => {
                metrics.counter_inc(&format!("{METRIC_PREFIX}.errors.write"));
                Err(e)
            }
        }
    }
}
