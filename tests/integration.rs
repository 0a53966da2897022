//! Integration tests for the uniform backend interface.
//!
//! These tests verify that:
//! 1. Every driver is usable through `dyn StorageBackend`
//! 2. Generic code written against the interface behaves the same on each driver
//! 3. Operations a storage system cannot perform fail with `NotSupported`
//! 4. Errors carry the normalized code and the failing operation

mod common;

use std::sync::Arc;

use common::MemoryObjects;
use storage_helpers::backends::object::ObjectClient;
use storage_helpers::*;
use tempfile::TempDir;

fn executor() -> Arc<dyn ExecutionContext> {
    Arc::new(RuntimeBlocking::current().expect("tokio runtime"))
}

fn local(dir: &TempDir) -> Arc<dyn StorageBackend> {
    Arc::new(LocalBackend::new(LocalConfig::new(dir.path()), executor()))
}

fn object(store: &Arc<MemoryObjects>) -> Arc<dyn StorageBackend> {
    let mut config = ObjectConfig::new("minio.local:9000", "bucket", "id", "secret");
    config.retry = RetryPolicy::no_retry();
    let client: Arc<dyn ObjectClient> = Arc::clone(store) as Arc<dyn ObjectClient>;
    Arc::new(ObjectBackend::new(config, client, executor()))
}

// =============================================================================
// Generic usage
// =============================================================================

/// Writes a file through any backend and reads it back.
async fn store_and_fetch(
    backend: &dyn StorageBackend,
    file_id: &str,
    body: &'static [u8],
) -> Result<Vec<u8>, FsError> {
    backend.mknod(file_id, 0o644, NodeKind::Regular, 0).await?;
    let handle = backend.open(file_id, OpenFlags::READ_WRITE, &Params::new()).await?;
    let written = handle.write(0, BufChain::from(body)).await?;
    assert_eq!(written, body.len());
    let data = handle.read(0, body.len()).await?;
    handle.release().await?;
    Ok(data.to_vec())
}

#[tokio::test]
async fn same_code_runs_on_every_driver() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryObjects::new());

    for backend in [local(&dir), object(&store)] {
        let data = store_and_fetch(backend.as_ref(), "report.csv", b"a,b,c\n").await.unwrap();
        assert_eq!(data, b"a,b,c\n");

        let attrs = backend.getattr("report.csv").await.unwrap();
        assert!(attrs.is_file());
        assert_eq!(attrs.size, 6);

        assert_eq!(backend.readdir("", 0, 10).await.unwrap(), vec!["report.csv"]);

        backend.unlink("report.csv", 6).await.unwrap();
        let err = backend.getattr("report.csv").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}

#[tokio::test]
async fn backends_are_shareable_across_tasks() {
    let dir = TempDir::new().unwrap();
    let backend = local(&dir);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let backend = Arc::clone(&backend);
        tasks.push(tokio::spawn(async move {
            backend.mkdir(&format!("d{i}"), 0o755).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(backend.readdir("", 0, 100).await.unwrap().len(), 8);
}

// =============================================================================
// Capability gaps
// =============================================================================

#[tokio::test]
async fn object_storage_rejects_posix_only_operations() {
    let store = Arc::new(MemoryObjects::new());
    store.insert("f", b"x");
    let backend = object(&store);

    let results = [
        backend.mkdir("d", 0o755).await,
        backend.rmdir("d").await,
        backend.rename("f", "g").await,
        backend.symlink("f", "s").await,
        backend.link("f", "h").await,
        backend.chmod("f", 0o600).await,
        backend.chown("f", Some(1), None).await,
        backend
            .setxattr("f", "user.a", bytes::Bytes::new(), XattrMode::Upsert)
            .await,
        backend.removexattr("f", "user.a").await,
        backend.readlink("f").await.map(|_| ()),
        backend.getxattr("f", "user.a").await.map(|_| ()),
        backend.listxattr("f").await.map(|_| ()),
    ];

    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotSupported, "{err}");
    }
    // Nothing reached the store.
    assert_eq!(store.calls(), 0);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn errors_name_the_failing_operation() {
    let dir = TempDir::new().unwrap();
    let backend = local(&dir);

    let err = backend.rmdir("missing").await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(err.operation(), "rmdir");
    assert!(err.to_string().starts_with("rmdir: no such file or directory"));
    assert_eq!(err.code().errno(), libc::ENOENT);
}

#[test]
fn unknown_errno_is_never_success() {
    let err = FsError::from_errno(123_456, "read");
    assert_eq!(err.code(), ErrorCode::Io);
}
