//! Distributed-filesystem driver against an in-memory volume client.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use storage_helpers::backends::distributed::{DfsClient, DfsFile, DfsResult, MIN_WORKER_THREADS};
use storage_helpers::*;

// =============================================================================
// In-memory volume
// =============================================================================

#[derive(Default)]
struct Volume {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeMap<String, u32>>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    stat_calls: AtomicUsize,
    stat_failures: Mutex<VecDeque<i32>>,
    connect_failures: Mutex<VecDeque<i32>>,
    close_failures: Mutex<VecDeque<i32>>,
    refuse_identity: AtomicBool,
}

thread_local! {
    static WORKER_IDENTITY: Cell<(u32, u32)> = const { Cell::new((0, 0)) };
}

/// Per-thread identity that stops accepting switches once `refuse_identity` is set.
impl IdentitySwitch for Volume {
    fn set_uid(&self, uid: u32) -> u32 {
        WORKER_IDENTITY.with(|c| {
            let (previous, gid) = c.get();
            if !self.refuse_identity.load(Ordering::SeqCst) || uid == 0 {
                c.set((uid, gid));
            }
            previous
        })
    }

    fn set_gid(&self, gid: u32) -> u32 {
        WORKER_IDENTITY.with(|c| {
            let (uid, previous) = c.get();
            c.set((uid, gid));
            previous
        })
    }

    fn current(&self) -> (u32, u32) {
        WORKER_IDENTITY.with(Cell::get)
    }
}

struct VolumeFile {
    path: String,
    volume: Arc<Volume>,
    closes: Arc<AtomicUsize>,
}

impl DfsFile for VolumeFile {
    fn pread(&self, offset: u64, size: usize) -> DfsResult<Vec<u8>> {
        let files = self.volume.files.lock();
        let data = files.get(&self.path).ok_or(libc::ENOENT)?;
        let start = (offset as usize).min(data.len());
        let end = (start + size).min(data.len());
        Ok(data[start..end].to_vec())
    }

    fn pwrite(&self, offset: u64, data: &[u8]) -> DfsResult<usize> {
        let mut files = self.volume.files.lock();
        let file = files.get_mut(&self.path).ok_or(libc::ENOENT)?;
        let offset = offset as usize;
        // Short writes of at most 3 bytes exercise resumption.
        let n = data.len().min(3);
        if file.len() < offset + n {
            file.resize(offset + n, 0);
        }
        file[offset..offset + n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn fsync(&self, _data_only: bool) -> DfsResult<()> {
        Ok(())
    }

    fn close(&self) -> DfsResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        match self.volume.close_failures.lock().pop_front() {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}

/// Client handing out files that point back at the shared volume.
struct Client(Arc<Volume>);

impl DfsClient for Client {
    fn connect(&self) -> DfsResult<()> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        match self.0.connect_failures.lock().pop_front() {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }

    fn identity(&self) -> &dyn IdentitySwitch {
        &*self.0
    }

    fn open(&self, path: &str, flags: i32) -> DfsResult<Box<dyn DfsFile>> {
        let mut files = self.0.files.lock();
        if !files.contains_key(path) {
            if flags & libc::O_CREAT == 0 {
                return Err(libc::ENOENT);
            }
            files.insert(path.to_string(), Vec::new());
        }
        Ok(Box::new(VolumeFile {
            path: path.to_string(),
            volume: Arc::clone(&self.0),
            closes: Arc::clone(&self.0.closes),
        }))
    }

    fn stat(&self, path: &str) -> DfsResult<Attributes> {
        self.0.stat_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(errno) = self.0.stat_failures.lock().pop_front() {
            return Err(errno);
        }
        if let Some(data) = self.0.files.lock().get(path) {
            return Ok(Attributes {
                size: data.len() as u64,
                ..Attributes::default()
            });
        }
        match self.0.dirs.lock().get(path) {
            Some(mode) => Ok(Attributes {
                mode: libc::S_IFDIR as u32 | mode,
                ..Attributes::default()
            }),
            None => Err(libc::ENOENT),
        }
    }

    fn access(&self, path: &str, _mask: i32) -> DfsResult<()> {
        self.stat(path).map(|_| ())
    }

    fn readdir(&self, path: &str) -> DfsResult<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut names = vec![".".to_string(), "..".to_string()];
        names.extend(
            self.0
                .files
                .lock()
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string),
        );
        Ok(names)
    }

    fn readlink(&self, _path: &str) -> DfsResult<String> {
        Err(libc::EINVAL)
    }

    fn mknod(&self, path: &str, _mode: u32, _rdev: u64) -> DfsResult<()> {
        self.0.files.lock().insert(path.to_string(), Vec::new());
        Ok(())
    }

    fn mkdir(&self, path: &str, mode: u32) -> DfsResult<()> {
        let mut dirs = self.0.dirs.lock();
        if dirs.contains_key(path) {
            return Err(libc::EEXIST);
        }
        dirs.insert(path.to_string(), mode);
        Ok(())
    }

    fn unlink(&self, path: &str) -> DfsResult<()> {
        self.0.files.lock().remove(path).map(|_| ()).ok_or(libc::ENOENT)
    }

    fn rmdir(&self, path: &str) -> DfsResult<()> {
        self.0.dirs.lock().remove(path).map(|_| ()).ok_or(libc::ENOENT)
    }

    fn symlink(&self, _target: &str, _link: &str) -> DfsResult<()> {
        Err(libc::EPERM)
    }

    fn rename(&self, from: &str, to: &str) -> DfsResult<()> {
        let mut files = self.0.files.lock();
        let data = files.remove(from).ok_or(libc::ENOENT)?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    fn link(&self, _from: &str, _to: &str) -> DfsResult<()> {
        Err(libc::EPERM)
    }

    fn chmod(&self, _path: &str, _mode: u32) -> DfsResult<()> {
        Ok(())
    }

    fn chown(&self, _path: &str, _uid: Option<u32>, _gid: Option<u32>) -> DfsResult<()> {
        Ok(())
    }

    fn truncate(&self, path: &str, size: u64) -> DfsResult<()> {
        let mut files = self.0.files.lock();
        let file = files.get_mut(path).ok_or(libc::ENOENT)?;
        file.resize(size as usize, 0);
        Ok(())
    }

    fn getxattr(&self, _path: &str, _name: &str) -> DfsResult<Vec<u8>> {
        Err(libc::ENODATA)
    }

    fn setxattr(&self, _path: &str, _name: &str, _value: &[u8], _mode: XattrMode) -> DfsResult<()> {
        Ok(())
    }

    fn removexattr(&self, _path: &str, _name: &str) -> DfsResult<()> {
        Ok(())
    }

    fn listxattr(&self, _path: &str) -> DfsResult<Vec<String>> {
        Ok(Vec::new())
    }
}

fn config() -> DistributedConfig {
    let mut config = DistributedConfig::new("gluster.local", "vol0");
    config.mount_point = "/space".to_string();
    config.worker_threads = 2;
    config.retry = RetryPolicy::immediate(3);
    config
}

fn backend(volume: &Arc<Volume>) -> DistributedBackend {
    DistributedBackend::new(config(), Arc::new(Client(Arc::clone(volume)))).unwrap()
}

// =============================================================================
// Construction and connection
// =============================================================================

#[test]
fn too_few_workers_are_rejected() {
    let volume = Arc::new(Volume::default());
    let mut config = config();
    config.worker_threads = MIN_WORKER_THREADS - 1;

    let err = DistributedBackend::new(config, Arc::new(Client(volume))).unwrap_err();

    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[tokio::test]
async fn connects_once_lazily() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    assert_eq!(volume.connects.load(Ordering::SeqCst), 0);

    dfs.mkdir("d", 0o755).await.unwrap();
    dfs.getattr("d").await.unwrap();
    dfs.connect().await.unwrap();

    assert_eq!(volume.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_connect_is_retried_on_next_call() {
    let volume = Arc::new(Volume::default());
    volume.connect_failures.lock().extend([libc::EHOSTUNREACH; 3]);
    let dfs = backend(&volume);

    let err = dfs.connect().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::HostUnreachable);

    dfs.connect().await.unwrap();
    assert_eq!(volume.connects.load(Ordering::SeqCst), 4);
}

// =============================================================================
// Retry
// =============================================================================

#[tokio::test]
async fn transient_errno_is_retried() {
    let volume = Arc::new(Volume::default());
    volume.stat_failures.lock().extend([libc::EAGAIN, libc::EIO]);
    let dfs = backend(&volume);
    dfs.mkdir("d", 0o755).await.unwrap();

    assert!(dfs.getattr("d").await.unwrap().is_dir());
    assert_eq!(volume.stat_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn terminal_errno_is_not_retried() {
    let volume = Arc::new(Volume::default());
    let metrics = Arc::new(MetricsRecorder::new());
    let dfs = backend(&volume).with_metrics(metrics.clone());

    let err = dfs.getattr("missing").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(volume.stat_calls.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.counter("comp.helpers.mod.glusterfs.getattr.retries"), 0);
}

// =============================================================================
// Handles
// =============================================================================

#[tokio::test]
async fn short_writes_are_resumed() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    let handle = dfs.open("f", OpenFlags::CREATE, &Params::new()).await.unwrap();

    let mut buf = BufChain::new();
    buf.push(&b"hello "[..]);
    buf.push(&b"world"[..]);
    assert_eq!(handle.write(0, buf).await.unwrap(), 11);

    assert_eq!(&handle.read(0, 64).await.unwrap()[..], b"hello world");
    assert_eq!(volume.files.lock()["/space/f"], b"hello world");
}

#[tokio::test]
async fn release_closes_exactly_once() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    let handle = dfs.open("f", OpenFlags::CREATE, &Params::new()).await.unwrap();

    handle.release().await.unwrap();
    handle.release().await.unwrap();
    drop(handle);

    assert_eq!(volume.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_close_is_logged_not_returned() {
    let volume = Arc::new(Volume::default());
    volume.close_failures.lock().push_back(libc::EIO);
    let dfs = backend(&volume);
    let handle = dfs.open("f", OpenFlags::CREATE, &Params::new()).await.unwrap();

    // The descriptor is gone either way, so release still succeeds.
    handle.release().await.unwrap();
    assert_eq!(volume.closes.load(Ordering::SeqCst), 1);

    handle.release().await.unwrap();
    drop(handle);
    assert_eq!(volume.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn release_under_refused_identity_still_closes() {
    let volume = Arc::new(Volume::default());
    let mut config = config();
    config.identity = Identity::new(7, 7);
    let dfs = DistributedBackend::new(config, Arc::new(Client(Arc::clone(&volume)))).unwrap();
    let handle = dfs.open("f", OpenFlags::CREATE, &Params::new()).await.unwrap();
    volume.refuse_identity.store(true, Ordering::SeqCst);

    let err = handle.release().await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::Domain);
    assert_eq!(err.operation(), "release");
    assert_eq!(volume.closes.load(Ordering::SeqCst), 1);

    handle.release().await.unwrap();
    drop(handle);
    assert_eq!(volume.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn drop_without_release_closes() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    let handle = dfs.open("f", OpenFlags::CREATE, &Params::new()).await.unwrap();

    drop(handle);

    assert_eq!(volume.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn io_after_release_is_bad_descriptor() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    let handle = dfs.open("f", OpenFlags::CREATE, &Params::new()).await.unwrap();
    handle.release().await.unwrap();

    let err = handle.read(0, 1).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadDescriptor);
    let err = handle.fsync(false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadDescriptor);
}

// =============================================================================
// Namespace operations
// =============================================================================

#[tokio::test]
async fn readdir_skips_dot_entries() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    for name in ["a", "b", "c"] {
        dfs.mknod(&format!("d/{name}"), 0o644, NodeKind::Regular, 0)
            .await
            .unwrap();
    }

    assert_eq!(dfs.readdir("d", 0, 10).await.unwrap(), vec!["a", "b", "c"]);
    assert_eq!(dfs.readdir("/d", 1, 1).await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn errno_is_translated() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);

    assert_eq!(dfs.symlink("a", "b").await.unwrap_err().code(), ErrorCode::NotPermitted);
    assert_eq!(dfs.getxattr("a", "user.x").await.unwrap_err().code(), ErrorCode::NoAttribute);
    dfs.mkdir("d", 0o755).await.unwrap();
    assert_eq!(dfs.mkdir("d", 0o755).await.unwrap_err().code(), ErrorCode::AlreadyExists);
}

#[tokio::test]
async fn paths_stay_under_mount_point() {
    let volume = Arc::new(Volume::default());
    let dfs = backend(&volume);
    dfs.mknod("f", 0o644, NodeKind::Regular, 0).await.unwrap();
    dfs.rename("f", "/g").await.unwrap();
    dfs.truncate("g", 4, 0).await.unwrap();

    assert_eq!(volume.files.lock()["/space/g"], vec![0u8; 4]);
    let err = dfs.unlink("../g", 0).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}
