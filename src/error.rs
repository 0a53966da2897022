//! Normalized error taxonomy shared by every storage backend.
//!
//! Backends translate their native failures (POSIX `errno`, object-store SDK
//! error kinds, distributed-filesystem return codes) into exactly one
//! [`ErrorCode`] before the failure leaves the driver.

use std::fmt;

#[cfg(any(target_os = "linux", target_os = "android"))]
const NO_ATTR: i32 = libc::ENODATA;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const NO_ATTR: i32 = libc::ENOATTR;

/// Backend-independent error code.
///
/// The space mirrors the POSIX `errno` values a filesystem caller already
/// understands. Every native failure maps to exactly one code; anything a
/// backend does not recognise becomes [`ErrorCode::Io`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorCode {
    /// The file or object does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// Access was denied by the permission model.
    #[error("permission denied")]
    PermissionDenied,
    /// The operation requires privileges the caller lacks.
    #[error("operation not permitted")]
    NotPermitted,
    /// The target already exists.
    #[error("file exists")]
    AlreadyExists,
    /// A path component is not a directory.
    #[error("not a directory")]
    NotADirectory,
    /// The target is a directory.
    #[error("is a directory")]
    IsADirectory,
    /// The directory is not empty.
    #[error("directory not empty")]
    NotEmpty,
    /// An argument was rejected.
    #[error("invalid argument")]
    InvalidArgument,
    /// Generic input/output failure.
    #[error("input/output error")]
    Io,
    /// The backend has no meaningful implementation of the operation.
    #[error("operation not supported")]
    NotSupported,
    /// The resource is temporarily unavailable.
    #[error("resource temporarily unavailable")]
    WouldBlock,
    /// The call was interrupted.
    #[error("interrupted system call")]
    Interrupted,
    /// The request did not complete in time.
    #[error("timed out")]
    TimedOut,
    /// The network is unreachable.
    #[error("network unreachable")]
    NetworkUnreachable,
    /// The remote host is unreachable.
    #[error("host unreachable")]
    HostUnreachable,
    /// The connection was reset or aborted.
    #[error("connection reset")]
    ConnectionReset,
    /// The device or resource is busy.
    #[error("device or resource busy")]
    Busy,
    /// The handle refers to a file that no longer exists on the server.
    #[error("stale file handle")]
    StaleHandle,
    /// The descriptor is not open.
    #[error("bad file descriptor")]
    BadDescriptor,
    /// The extended attribute does not exist.
    #[error("no such attribute")]
    NoAttribute,
    /// A result did not fit into the supplied buffer.
    #[error("result out of range")]
    Range,
    /// A name exceeds the backend limit.
    #[error("file name too long")]
    NameTooLong,
    /// No space left on the device.
    #[error("no space left on device")]
    NoSpace,
    /// The filesystem is read-only.
    #[error("read-only file system")]
    ReadOnly,
    /// Rename or link across devices.
    #[error("cross-device link")]
    CrossDevice,
    /// Too many levels of symbolic links.
    #[error("too many levels of symbolic links")]
    Loop,
    /// The requested user/group identity could not be assumed.
    #[error("failed to assume user identity")]
    Domain,
}

impl ErrorCode {
    /// Translates a POSIX `errno` value.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => Self::NotFound,
            libc::EACCES => Self::PermissionDenied,
            libc::EPERM => Self::NotPermitted,
            libc::EEXIST => Self::AlreadyExists,
            libc::ENOTDIR => Self::NotADirectory,
            libc::EISDIR => Self::IsADirectory,
            libc::ENOTEMPTY => Self::NotEmpty,
            libc::EINVAL => Self::InvalidArgument,
            libc::ENOTSUP => Self::NotSupported,
            libc::EAGAIN => Self::WouldBlock,
            libc::EINTR => Self::Interrupted,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::ENETUNREACH | libc::ENETDOWN => Self::NetworkUnreachable,
            libc::EHOSTUNREACH | libc::EHOSTDOWN => Self::HostUnreachable,
            libc::ECONNRESET | libc::ECONNABORTED | libc::ENOTCONN | libc::EPIPE => {
                Self::ConnectionReset
            }
            libc::EBUSY | libc::ETXTBSY => Self::Busy,
            libc::ESTALE => Self::StaleHandle,
            libc::EBADF => Self::BadDescriptor,
            libc::ERANGE => Self::Range,
            libc::ENAMETOOLONG => Self::NameTooLong,
            libc::ENOSPC | libc::EDQUOT => Self::NoSpace,
            libc::EROFS => Self::ReadOnly,
            libc::EXDEV => Self::CrossDevice,
            libc::ELOOP => Self::Loop,
            libc::EDOM => Self::Domain,
            e if e == NO_ATTR => Self::NoAttribute,
            e if e == libc::EOPNOTSUPP => Self::NotSupported,
            _ => Self::Io,
        }
    }

    /// Returns the canonical POSIX `errno` for this code.
    pub fn errno(self) -> i32 {
        match self {
            Self::NotFound => libc::ENOENT,
            Self::PermissionDenied => libc::EACCES,
            Self::NotPermitted => libc::EPERM,
            Self::AlreadyExists => libc::EEXIST,
            Self::NotADirectory => libc::ENOTDIR,
            Self::IsADirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::InvalidArgument => libc::EINVAL,
            Self::Io => libc::EIO,
            Self::NotSupported => libc::ENOTSUP,
            Self::WouldBlock => libc::EAGAIN,
            Self::Interrupted => libc::EINTR,
            Self::TimedOut => libc::ETIMEDOUT,
            Self::NetworkUnreachable => libc::ENETUNREACH,
            Self::HostUnreachable => libc::EHOSTUNREACH,
            Self::ConnectionReset => libc::ECONNRESET,
            Self::Busy => libc::EBUSY,
            Self::StaleHandle => libc::ESTALE,
            Self::BadDescriptor => libc::EBADF,
            Self::NoAttribute => NO_ATTR,
            Self::Range => libc::ERANGE,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NoSpace => libc::ENOSPC,
            Self::ReadOnly => libc::EROFS,
            Self::CrossDevice => libc::EXDEV,
            Self::Loop => libc::ELOOP,
            Self::Domain => libc::EDOM,
        }
    }
}

/// A failed storage operation.
///
/// Carries the normalized [`ErrorCode`], the operation that failed and an
/// optional human-readable message from the backend.
///
/// # Examples
///
/// ```rust
/// use storage_helpers::{ErrorCode, FsError};
///
/// let err = FsError::new(ErrorCode::NotFound, "getattr");
/// assert_eq!(err.to_string(), "getattr: no such file or directory");
///
/// let err = FsError::not_supported("symlink");
/// assert_eq!(err.code(), ErrorCode::NotSupported);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation}: {code}{}", MessageSuffix(.message.as_deref()))]
pub struct FsError {
    code: ErrorCode,
    operation: &'static str,
    message: Option<String>,
}

impl FsError {
    /// Creates an error without a message.
    pub fn new(code: ErrorCode, operation: &'static str) -> Self {
        Self {
            code,
            operation,
            message: None,
        }
    }

    /// Creates an error with a backend message.
    pub fn with_message(
        code: ErrorCode,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            operation,
            message: Some(message.into()),
        }
    }

    /// Translates a raw `errno` value.
    pub fn from_errno(errno: i32, operation: &'static str) -> Self {
        Self::new(ErrorCode::from_errno(errno), operation)
    }

    /// The operation has no meaning on this backend.
    pub fn not_supported(operation: &'static str) -> Self {
        Self::new(ErrorCode::NotSupported, operation)
    }

    /// The requested identity could not be assumed.
    pub fn domain(operation: &'static str) -> Self {
        Self::with_message(
            ErrorCode::Domain,
            operation,
            "failed to set user context",
        )
    }

    /// Translates an I/O error raised while performing `operation`.
    pub fn io(operation: &'static str, error: &std::io::Error) -> Self {
        let code = match error.raw_os_error() {
            Some(errno) => ErrorCode::from_errno(errno),
            None => code_from_kind(error.kind()),
        };
        Self::with_message(code, operation, error.to_string())
    }

    /// The normalized code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The operation that failed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// The backend message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Renders ` (message)` when a backend message is present.
struct MessageSuffix<'a>(Option<&'a str>);

impl fmt::Display for MessageSuffix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(message) => write!(f, " ({message})"),
            None => Ok(()),
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(error: std::io::Error) -> Self {
        FsError::io("io", &error)
    }
}

fn code_from_kind(kind: std::io::ErrorKind) -> ErrorCode {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::NotFound => ErrorCode::NotFound,
        ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
        ErrorKind::AlreadyExists => ErrorCode::AlreadyExists,
        ErrorKind::InvalidInput => ErrorCode::InvalidArgument,
        ErrorKind::WouldBlock => ErrorCode::WouldBlock,
        ErrorKind::Interrupted => ErrorCode::Interrupted,
        ErrorKind::TimedOut => ErrorCode::TimedOut,
        ErrorKind::Unsupported => ErrorCode::NotSupported,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            ErrorCode::ConnectionReset
        }
        _ => ErrorCode::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_message() {
        let err = FsError::new(ErrorCode::NotFound, "getattr");
        assert_eq!(err.to_string(), "getattr: no such file or directory");
    }

    #[test]
    fn display_with_message() {
        let err = FsError::with_message(ErrorCode::Io, "PutObject", "socket closed");
        assert_eq!(err.to_string(), "PutObject: input/output error (socket closed)");
    }

    #[test]
    fn boxes_as_std_error() {
        let err: Box<dyn std::error::Error + Send + Sync> =
            Box::new(FsError::new(ErrorCode::TimedOut, "read"));
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "read: timed out");
    }

    #[test]
    fn domain_error_code() {
        let err = FsError::domain("read");
        assert_eq!(err.code(), ErrorCode::Domain);
        assert_eq!(err.operation(), "read");
        assert!(err.message().is_some());
    }

    #[test]
    fn errno_round_trips_for_common_codes() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::PermissionDenied,
            ErrorCode::AlreadyExists,
            ErrorCode::NotADirectory,
            ErrorCode::IsADirectory,
            ErrorCode::InvalidArgument,
            ErrorCode::Io,
            ErrorCode::NotSupported,
            ErrorCode::WouldBlock,
            ErrorCode::TimedOut,
            ErrorCode::NetworkUnreachable,
            ErrorCode::Busy,
            ErrorCode::StaleHandle,
            ErrorCode::NoAttribute,
            ErrorCode::Domain,
        ] {
            assert_eq!(ErrorCode::from_errno(code.errno()), code);
        }
    }

    #[test]
    fn unknown_errno_is_io() {
        assert_eq!(ErrorCode::from_errno(99_999), ErrorCode::Io);
        assert_eq!(ErrorCode::from_errno(libc::EIO), ErrorCode::Io);
    }

    #[test]
    fn from_io_error_prefers_raw_errno() {
        let io_err = std::io::Error::from_raw_os_error(libc::ENOTEMPTY);
        let err = FsError::from(io_err);
        assert_eq!(err.code(), ErrorCode::NotEmpty);
    }

    #[test]
    fn from_io_error_falls_back_to_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        assert_eq!(FsError::from(io_err).code(), ErrorCode::NotFound);

        let io_err = std::io::Error::other("test");
        assert_eq!(FsError::from(io_err).code(), ErrorCode::Io);
    }
}
