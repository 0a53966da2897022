//! Storage drivers.
//!
//! | Driver | Storage | Identity | Execution context |
//! |--------|---------|----------|-------------------|
//! | [`local`] | directory tree under a mount root | per call | shared, supplied by caller |
//! | [`object`] | bucket behind an [`ObjectClient`](object::ObjectClient) | none | shared, supplied by caller |
//! | [`distributed`] | volume behind a [`DfsClient`](distributed::DfsClient) | per call | own [`WorkerPool`](crate::WorkerPool) |
//! | [`proxy`] | remote endpoint behind a [`ProxyChannel`](proxy::ProxyChannel) | remote | none (already async) |

pub mod distributed;
pub mod local;
pub mod object;
pub mod proxy;

/// `errno` values the POSIX-family drivers treat as transient.
///
/// Includes `EACCES`, which the object-storage driver treats as terminal.
const POSIX_TRANSIENT_ERRNOS: &[i32] = &[
    libc::EINTR,
    libc::EIO,
    libc::EAGAIN,
    libc::EACCES,
    libc::EBUSY,
    libc::EMFILE,
    libc::ETXTBSY,
    libc::ESPIPE,
    libc::EMLINK,
    libc::EPIPE,
    libc::EDEADLK,
    libc::ENOLINK,
    libc::EADDRINUSE,
    libc::EADDRNOTAVAIL,
    libc::ENETDOWN,
    libc::ENETUNREACH,
    libc::ECONNABORTED,
    libc::ECONNRESET,
    libc::ENOTCONN,
    libc::EHOSTUNREACH,
    libc::ECANCELED,
    libc::ESTALE,
    libc::EHOSTDOWN,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    libc::ENONET,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    libc::EREMOTEIO,
    #[cfg(any(target_os = "linux", target_os = "android"))]
    libc::ENOMEDIUM,
];

/// Returns `true` if a POSIX-family call failing with `errno` may succeed
/// when repeated.
pub fn is_posix_retryable(errno: i32) -> bool {
    POSIX_TRANSIENT_ERRNOS.contains(&errno)
}

/// Retry predicate over `io::Error`s carrying an `errno`.
pub(crate) fn io_retryable(error: &std::io::Error) -> bool {
    error.raw_os_error().is_some_and(is_posix_retryable)
}
