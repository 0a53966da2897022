//! Open file handles.
//!
//! A [`FileHandle`] is produced by [`BackendOpen::open`](super::BackendOpen::open)
//! and used independently of the backend afterwards. Each handle owns one
//! native handle (a descriptor, a client file object, a remote session) and
//! releases it at most once.
//!
//! # Example
//!
//! ```rust
//! use storage_helpers::{BufChain, FileHandle, FsError};
//!
//! async fn overwrite(handle: &dyn FileHandle, data: &'static [u8]) -> Result<(), FsError> {
//!     let written = handle.write(0, BufChain::from(data)).await?;
//!     assert_eq!(written, data.len());
//!     handle.fsync(false).await?;
//!     handle.release().await
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{BufChain, FsError};

/// An open file.
///
/// # Release
///
/// [`release`](FileHandle::release) closes the native handle the first time
/// it is called and is a successful no-op afterwards, including when called
/// concurrently. A handle dropped without being released closes its native
/// handle on drop.
///
/// # Object Safety
///
/// This trait is object-safe and is normally used as `Box<dyn FileHandle>`.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Identifier the handle was opened for.
    fn file_id(&self) -> &str;

    /// Timeout callers should apply when waiting on this handle.
    fn timeout(&self) -> Duration;

    /// Reads up to `size` bytes at `offset`.
    ///
    /// Fewer bytes (possibly none) are returned at end of file.
    async fn read(&self, offset: u64, size: usize) -> Result<Bytes, FsError>;

    /// Writes all of `buf` at `offset` and returns the number of bytes written.
    ///
    /// An empty `buf` returns `0` without touching storage.
    async fn write(&self, offset: u64, buf: BufChain) -> Result<usize, FsError>;

    /// Writes several `(offset, buf)` pairs in order.
    ///
    /// Stops at the first failure. Returns the total number of bytes written.
    async fn multiwrite(&self, writes: Vec<(u64, BufChain)>) -> Result<usize, FsError> {
        let mut total = 0;
        for (offset, buf) in writes {
            total += self.write(offset, buf).await?;
        }
        Ok(total)
    }

    /// Flushes handle-level buffers. Nothing is buffered at this layer.
    async fn flush(&self) -> Result<(), FsError> {
        Ok(())
    }

    /// Forces the file's data (and metadata unless `data_only`) to storage.
    async fn fsync(&self, data_only: bool) -> Result<(), FsError> {
        let _ = data_only;
        Ok(())
    }

    /// Releases the native handle.
    ///
    /// Close failures are logged rather than returned.
    async fn release(&self) -> Result<(), FsError> {
        Ok(())
    }
}

/// One-shot "needs release" flag.
///
/// Starts set; [`take`](Self::take) clears it atomically and reports whether
/// this caller was the one that cleared it.
#[derive(Debug)]
pub struct ReleaseFlag(AtomicBool);

impl ReleaseFlag {
    /// A flag for a freshly opened handle.
    pub const fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    /// Clears the flag; returns `true` exactly once.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Returns `true` until the flag has been taken.
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for ReleaseFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn file_handle_is_object_safe() {
        fn _check(_: &dyn FileHandle) {}
    }

    #[test]
    fn release_flag_taken_once() {
        let flag = ReleaseFlag::new();
        assert!(flag.is_open());
        assert!(flag.take());
        assert!(!flag.take());
        assert!(!flag.is_open());
    }

    #[test]
    fn release_flag_taken_once_across_threads() {
        let flag = Arc::new(ReleaseFlag::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let flag = Arc::clone(&flag);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if flag.take() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    /// In-memory handle recording writes.
    struct Recording {
        writes: Mutex<Vec<(u64, usize)>>,
    }

    #[async_trait]
    impl FileHandle for Recording {
        fn file_id(&self) -> &str {
            "mem"
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn read(&self, _offset: u64, _size: usize) -> Result<Bytes, FsError> {
            Ok(Bytes::new())
        }

        async fn write(&self, offset: u64, buf: BufChain) -> Result<usize, FsError> {
            if offset == 99 {
                return Err(FsError::from_errno(libc::EIO, "write"));
            }
            self.writes.lock().push((offset, buf.len()));
            Ok(buf.len())
        }
    }

    #[tokio::test]
    async fn multiwrite_defaults_to_sequential_writes() {
        let handle = Recording {
            writes: Mutex::new(Vec::new()),
        };
        let total = handle
            .multiwrite(vec![
                (0, BufChain::from(&b"abc"[..])),
                (10, BufChain::from(&b"de"[..])),
            ])
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(*handle.writes.lock(), vec![(0, 3), (10, 2)]);

        let err = handle
            .multiwrite(vec![(99, BufChain::from(&b"x"[..])), (0, BufChain::from(&b"y"[..]))])
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Io);
        assert_eq!(handle.writes.lock().len(), 2);
    }

    #[tokio::test]
    async fn default_flush_fsync_release_succeed() {
        let handle = Recording {
            writes: Mutex::new(Vec::new()),
        };
        handle.flush().await.unwrap();
        handle.fsync(true).await.unwrap();
        handle.release().await.unwrap();
        handle.release().await.unwrap();
    }
}
