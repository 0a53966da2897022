//! Thin wrappers over the `libc` calls that `std` does not expose.
//!
//! Every function returns `io::Result` carrying the raw `errno`, so callers
//! can classify failures before translating them. This is the only module
//! that contains `unsafe` code.

use std::ffi::CString;
use std::io;
use std::io::IoSlice;
use std::os::unix::ffi::OsStrExt;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::path::Path;

use crate::XattrMode;

fn cstr(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn cname(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn check(res: libc::c_int) -> io::Result<()> {
    if res == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn check_size(res: libc::ssize_t) -> io::Result<usize> {
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(res as usize)
    }
}

/// Effective user id of the process.
pub fn geteuid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Effective group id of the process.
pub fn getegid() -> u32 {
    // SAFETY: getegid has no preconditions and cannot fail.
    unsafe { libc::getegid() }
}

/// Sets the calling thread's filesystem uid; returns the previous one.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn setfsuid(uid: u32) -> u32 {
    // SAFETY: setfsuid only touches the calling thread's credentials.
    unsafe { libc::setfsuid(uid) as u32 }
}

/// Sets the calling thread's filesystem gid; returns the previous one.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn setfsgid(gid: u32) -> u32 {
    // SAFETY: setfsgid only touches the calling thread's credentials.
    unsafe { libc::setfsgid(gid) as u32 }
}

/// Opens `path` with raw `open(2)` flags.
pub fn open(path: &Path, flags: i32, mode: u32) -> io::Result<OwnedFd> {
    let path = cstr(path)?;
    // SAFETY: `path` is a valid NUL-terminated string for the duration of the call.
    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC, mode as libc::c_uint) };
    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        // SAFETY: `fd` was just returned by open(2) and is owned by nobody else.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}

/// Closes a descriptor, reporting the `close(2)` result that dropping an
/// `OwnedFd` would discard.
pub fn close(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: `raw` came from an `OwnedFd`, so nothing else closes it.
    check(unsafe { libc::close(raw) })
}

/// Positioned read of up to `size` bytes.
pub fn pread(fd: BorrowedFd<'_>, size: usize, offset: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    // SAFETY: `buf` is valid for writes of `size` bytes.
    let res = unsafe {
        libc::pread(
            fd.as_raw_fd(),
            buf.as_mut_ptr().cast(),
            size,
            offset as libc::off_t,
        )
    };
    let read = check_size(res)?;
    buf.truncate(read);
    Ok(buf)
}

/// Moves the file offset to `offset` from the start.
pub fn lseek(fd: BorrowedFd<'_>, offset: u64) -> io::Result<()> {
    // SAFETY: lseek has no memory-safety preconditions.
    let res = unsafe { libc::lseek(fd.as_raw_fd(), offset as libc::off_t, libc::SEEK_SET) };
    if res == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Gathers `slices` into one `writev(2)` call.
///
/// `slices.len()` must not exceed [`iov_max`].
pub fn writev(fd: BorrowedFd<'_>, slices: &[IoSlice<'_>]) -> io::Result<usize> {
    // SAFETY: `IoSlice` is ABI-compatible with `struct iovec` on Unix and the
    // slices borrow live buffers for the duration of the call.
    let res = unsafe {
        libc::writev(
            fd.as_raw_fd(),
            slices.as_ptr().cast::<libc::iovec>(),
            slices.len() as libc::c_int,
        )
    };
    check_size(res)
}

/// Largest number of buffers a single `writev` accepts.
pub fn iov_max() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let limit = unsafe { libc::sysconf(libc::_SC_IOV_MAX) };
    if limit > 0 { limit as usize } else { 1024 }
}

/// Flushes file data (and metadata unless `data_only`) to stable storage.
pub fn fsync(fd: BorrowedFd<'_>, data_only: bool) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    #[cfg(any(target_os = "linux", target_os = "android"))]
    if data_only {
        // SAFETY: fdatasync has no memory-safety preconditions.
        return check(unsafe { libc::fdatasync(fd) });
    }
    let _ = data_only;
    // SAFETY: fsync has no memory-safety preconditions.
    check(unsafe { libc::fsync(fd) })
}

/// Checks the caller's permissions for `path`.
pub fn access(path: &Path, mask: i32) -> io::Result<()> {
    let path = cstr(path)?;
    // SAFETY: `path` is a valid NUL-terminated string.
    check(unsafe { libc::access(path.as_ptr(), mask) })
}

/// Creates a named pipe.
pub fn mkfifo(path: &Path, mode: u32) -> io::Result<()> {
    let path = cstr(path)?;
    // SAFETY: `path` is a valid NUL-terminated string.
    check(unsafe { libc::mkfifo(path.as_ptr(), mode as libc::mode_t) })
}

/// Creates a filesystem node (device, socket, ...).
pub fn mknod(path: &Path, mode: u32, rdev: u64) -> io::Result<()> {
    let path = cstr(path)?;
    // SAFETY: `path` is a valid NUL-terminated string.
    check(unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
}

/// Truncates or extends the file at `path`.
pub fn truncate(path: &Path, size: u64) -> io::Result<()> {
    let path = cstr(path)?;
    // SAFETY: `path` is a valid NUL-terminated string.
    check(unsafe { libc::truncate(path.as_ptr(), size as libc::off_t) })
}

/// Reads an extended attribute into a buffer of `capacity` bytes.
///
/// A zero `capacity` queries the value size without reading it.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn getxattr(path: &Path, name: &str, capacity: usize) -> io::Result<Vec<u8>> {
    let path = cstr(path)?;
    let name = cname(name)?;
    let mut buf = vec![0u8; capacity];
    // SAFETY: both strings are NUL-terminated and `buf` is valid for
    // `capacity` bytes (a null pointer is passed when it is empty).
    let res = unsafe {
        libc::getxattr(
            path.as_ptr(),
            name.as_ptr(),
            if capacity == 0 { std::ptr::null_mut() } else { buf.as_mut_ptr().cast() },
            capacity,
        )
    };
    let len = check_size(res)?;
    if capacity == 0 {
        return Ok(vec![0u8; len]);
    }
    buf.truncate(len);
    Ok(buf)
}

/// Sets an extended attribute.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn setxattr(path: &Path, name: &str, value: &[u8], mode: XattrMode) -> io::Result<()> {
    let path = cstr(path)?;
    let name = cname(name)?;
    let flags = match mode {
        XattrMode::Upsert => 0,
        XattrMode::Create => libc::XATTR_CREATE,
        XattrMode::Replace => libc::XATTR_REPLACE,
    };
    // SAFETY: both strings are NUL-terminated and `value` is a live slice.
    check(unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            flags,
        )
    })
}

/// Removes an extended attribute.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn removexattr(path: &Path, name: &str) -> io::Result<()> {
    let path = cstr(path)?;
    let name = cname(name)?;
    // SAFETY: both strings are NUL-terminated.
    check(unsafe { libc::removexattr(path.as_ptr(), name.as_ptr()) })
}

/// Reads the raw NUL-separated attribute name list.
///
/// A zero `capacity` queries the list size.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn listxattr(path: &Path, capacity: usize) -> io::Result<Vec<u8>> {
    let path = cstr(path)?;
    let mut buf = vec![0u8; capacity];
    // SAFETY: `path` is NUL-terminated and `buf` is valid for `capacity` bytes.
    let res = unsafe {
        libc::listxattr(
            path.as_ptr(),
            if capacity == 0 { std::ptr::null_mut() } else { buf.as_mut_ptr().cast() },
            capacity,
        )
    };
    let len = check_size(res)?;
    if capacity == 0 {
        return Ok(vec![0u8; len]);
    }
    buf.truncate(len);
    Ok(buf)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod no_xattr {
    use super::*;

    fn unsupported<T>() -> io::Result<T> {
        Err(io::Error::from_raw_os_error(libc::ENOTSUP))
    }

    pub fn getxattr(_path: &Path, name: &str, _capacity: usize) -> io::Result<Vec<u8>> {
        cname(name)?;
        unsupported()
    }

    pub fn setxattr(_path: &Path, _name: &str, _value: &[u8], _mode: XattrMode) -> io::Result<()> {
        unsupported()
    }

    pub fn removexattr(_path: &Path, _name: &str) -> io::Result<()> {
        unsupported()
    }

    pub fn listxattr(_path: &Path, _capacity: usize) -> io::Result<Vec<u8>> {
        unsupported()
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub use no_xattr::{getxattr, listxattr, removexattr, setxattr};

/// Splits a NUL-separated name blob into names, skipping empty entries.
pub fn split_names(blob: &[u8]) -> Vec<String> {
    blob.split(|&b| b == 0)
        .filter(|name| !name.is_empty())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn split_names_handles_trailing_nul() {
        assert_eq!(
            split_names(b"user.a\0user.bb\0"),
            vec!["user.a".to_string(), "user.bb".to_string()]
        );
        assert!(split_names(b"").is_empty());
        assert_eq!(split_names(b"\0\0x"), vec!["x".to_string()]);
    }

    #[test]
    fn iov_max_is_positive() {
        assert!(iov_max() >= 16);
    }

    #[test]
    fn path_with_nul_is_invalid() {
        let err = access(Path::new("a\0b"), libc::F_OK).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EINVAL));
    }

    #[test]
    fn open_missing_file_reports_errno() {
        let err = open(Path::new("/definitely/not/here"), libc::O_RDONLY, 0).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn write_then_pread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        let fd = open(&path, libc::O_CREAT | libc::O_RDWR, 0o644).unwrap();
        let borrowed = fd.as_fd();
        lseek(borrowed, 0).unwrap();
        let n = writev(borrowed, &[IoSlice::new(b"hello "), IoSlice::new(b"world")]).unwrap();
        assert_eq!(n, 11);
        assert_eq!(pread(borrowed, 5, 6).unwrap(), b"world");
        assert_eq!(pread(borrowed, 100, 11).unwrap(), b"");
        fsync(borrowed, true).unwrap();
        close(fd).unwrap();
    }
}
