//! Core types passed through the storage helper interface.

use std::time::{Duration, SystemTime};

use bytes::{Bytes, BytesMut};

/// Type of a filesystem entry, decoded from the `S_IFMT` bits of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileType {
    /// Regular file (or object).
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Named pipe.
    Fifo,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Unix domain socket.
    Socket,
}

impl FileType {
    /// Decodes the file type from a full `st_mode` value.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            S_IFIFO => Self::Fifo,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFSOCK => Self::Socket,
            _ => Self::File,
        }
    }
}

pub(crate) const S_IFMT: u32 = libc::S_IFMT as u32;
pub(crate) const S_IFREG: u32 = libc::S_IFREG as u32;
pub(crate) const S_IFDIR: u32 = libc::S_IFDIR as u32;
pub(crate) const S_IFLNK: u32 = libc::S_IFLNK as u32;
pub(crate) const S_IFIFO: u32 = libc::S_IFIFO as u32;
pub(crate) const S_IFCHR: u32 = libc::S_IFCHR as u32;
pub(crate) const S_IFBLK: u32 = libc::S_IFBLK as u32;
pub(crate) const S_IFSOCK: u32 = libc::S_IFSOCK as u32;

/// File attributes, in the shape of a POSIX `struct stat`.
///
/// Backends without a native notion of some field (object stores have no
/// owner or inode) leave it at its default.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attributes {
    /// Device containing the file.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Full mode: type bits plus permission bits.
    pub mode: u32,
    /// Number of hard links.
    pub nlink: u64,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Device id for special files.
    pub rdev: u64,
    /// Size in bytes.
    pub size: u64,
    /// Preferred I/O block size.
    pub blksize: u64,
    /// Number of 512-byte blocks allocated.
    pub blocks: u64,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

impl Attributes {
    /// Type of the entry.
    #[inline]
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    /// Permission bits only (`mode & 0o7777`).
    #[inline]
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    /// Returns `true` if this is a regular file.
    #[inline]
    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::File
    }

    /// Returns `true` if this is a directory.
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Returns `true` if this is a symbolic link.
    #[inline]
    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            dev: 0,
            ino: 0,
            mode: S_IFREG | 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            size: 0,
            blksize: 4096,
            blocks: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }
}

impl From<&std::fs::Metadata> for Attributes {
    fn from(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            size: meta.size(),
            blksize: meta.blksize(),
            blocks: meta.blocks(),
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
        }
    }
}

fn unix_time(secs: i64, nanos: i64) -> SystemTime {
    if secs < 0 {
        return SystemTime::UNIX_EPOCH;
    }
    SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nanos.clamp(0, 999_999_999) as u32)
}

/// Flags for opening a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpenFlags {
    /// Open for reading.
    pub read: bool,
    /// Open for writing.
    pub write: bool,
    /// Create file if it doesn't exist.
    pub create: bool,
    /// Fail if the file exists (only with `create`).
    pub exclusive: bool,
    /// Truncate file to zero length.
    pub truncate: bool,
    /// Append to end of file.
    pub append: bool,
}

impl OpenFlags {
    /// Read-only access.
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
        exclusive: false,
        truncate: false,
        append: false,
    };

    /// Write-only access to an existing file.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: false,
        exclusive: false,
        truncate: false,
        append: false,
    };

    /// Read and write access.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        exclusive: false,
        truncate: false,
        append: false,
    };

    /// Write access, creating the file when missing.
    pub const CREATE: Self = Self {
        read: false,
        write: true,
        create: true,
        exclusive: false,
        truncate: false,
        append: false,
    };

    /// Translates to `open(2)` flags.
    pub fn to_libc(self) -> i32 {
        let mut flags = match (self.read, self.write) {
            (true, true) => libc::O_RDWR,
            (false, true) => libc::O_WRONLY,
            _ => libc::O_RDONLY,
        };
        if self.create {
            flags |= libc::O_CREAT;
        }
        if self.exclusive {
            flags |= libc::O_EXCL;
        }
        if self.truncate {
            flags |= libc::O_TRUNC;
        }
        if self.append {
            flags |= libc::O_APPEND;
        }
        flags
    }
}

/// Kind of node requested from `mknod`.
///
/// The kind's type bits are OR-ed into the permission mode before the node is
/// created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeKind {
    /// Regular file.
    Regular,
    /// Named pipe.
    Fifo,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Unix domain socket.
    Socket,
}

impl NodeKind {
    /// The `S_IF*` bits for this kind.
    pub fn mask(self) -> u32 {
        match self {
            Self::Regular => S_IFREG,
            Self::Fifo => S_IFIFO,
            Self::CharDevice => S_IFCHR,
            Self::BlockDevice => S_IFBLK,
            Self::Socket => S_IFSOCK,
        }
    }
}

/// How `setxattr` treats an existing attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum XattrMode {
    /// Create or replace.
    #[default]
    Upsert,
    /// Fail if the attribute exists.
    Create,
    /// Fail if the attribute does not exist.
    Replace,
}

impl XattrMode {
    /// Builds the mode from the `create`/`replace` flag pair.
    ///
    /// When both are set, `create` wins.
    pub fn from_flags(create: bool, replace: bool) -> Self {
        match (create, replace) {
            (true, _) => Self::Create,
            (false, true) => Self::Replace,
            (false, false) => Self::Upsert,
        }
    }
}

/// A user/group identity to assume for the duration of one native call.
///
/// `None` in either field is the "unspecified" sentinel (`-1` in POSIX
/// terms): that half of the identity is left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identity {
    /// User id, or `None` to keep the current one.
    pub uid: Option<u32>,
    /// Group id, or `None` to keep the current one.
    pub gid: Option<u32>,
}

impl Identity {
    /// Leaves the calling thread's identity alone.
    pub const UNSPECIFIED: Self = Self {
        uid: None,
        gid: None,
    };

    /// Identity with both fields specified.
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Some(uid),
            gid: Some(gid),
        }
    }

    /// Builds an identity from raw ids where any negative value means
    /// "unspecified".
    pub fn from_raw(uid: i64, gid: i64) -> Self {
        Self {
            uid: u32::try_from(uid).ok().filter(|&u| u != u32::MAX),
            gid: u32::try_from(gid).ok().filter(|&g| g != u32::MAX),
        }
    }

    /// Returns `true` if neither field is specified.
    pub fn is_unspecified(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}

/// A write payload made of one or more fragments.
///
/// Fragments are written with vectored I/O, so a chain may hold more
/// fragments than a single `writev` call accepts; drivers split it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufChain {
    fragments: Vec<Bytes>,
}

impl BufChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment. Empty fragments are dropped.
    pub fn push(&mut self, fragment: impl Into<Bytes>) {
        let fragment = fragment.into();
        if !fragment.is_empty() {
            self.fragments.push(fragment);
        }
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }

    /// Returns `true` if the chain holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The fragments in order.
    pub fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    /// Coalesces the chain into one contiguous buffer.
    pub fn into_bytes(self) -> Bytes {
        match self.fragments.len() {
            0 => Bytes::new(),
            1 => self.fragments.into_iter().next().unwrap_or_default(),
            _ => {
                let mut out = BytesMut::with_capacity(self.len());
                for fragment in &self.fragments {
                    out.extend_from_slice(fragment);
                }
                out.freeze()
            }
        }
    }
}

impl From<Bytes> for BufChain {
    fn from(bytes: Bytes) -> Self {
        let mut chain = Self::new();
        chain.push(bytes);
        chain
    }
}

impl From<Vec<u8>> for BufChain {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<&'static [u8]> for BufChain {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}

impl From<Vec<Bytes>> for BufChain {
    fn from(fragments: Vec<Bytes>) -> Self {
        fragments.into_iter().collect()
    }
}

impl FromIterator<Bytes> for BufChain {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        let mut chain = Self::new();
        for fragment in iter {
            chain.push(fragment);
        }
        chain
    }
}
