//! Writes a file through the local-file driver and reads it back.
//!
//! ```text
//! RUST_LOG=debug cargo run --example local_roundtrip [mount-point]
//! ```
//!
//! Without an argument a temporary directory is used.

use std::sync::Arc;

use storage_helpers::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let scratch = tempfile::tempdir()?;
    let mount_point = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| scratch.path().to_path_buf());

    let pool = Arc::new(WorkerPool::new("posix", 4)?);
    let backend = LocalBackend::new(LocalConfig::new(&mount_point), pool)
        .with_metrics(Arc::new(MetricsRecorder::new()));

    backend.mkdir("demo", 0o755).await?;
    let handle = backend
        .open("demo/greeting.txt", OpenFlags::CREATE, &Params::new())
        .await?;

    let mut buf = BufChain::new();
    buf.push(&b"hello, "[..]);
    buf.push(&b"storage"[..]);
    let written = handle.write(0, buf).await?;
    handle.fsync(false).await?;
    handle.release().await?;

    let handle = backend
        .open("demo/greeting.txt", OpenFlags::READ, &Params::new())
        .await?;
    let data = handle.read(0, written).await?;
    handle.release().await?;

    let attrs = backend.getattr("demo/greeting.txt").await?;
    println!(
        "{} bytes in {}: {}",
        attrs.size,
        mount_point.display(),
        String::from_utf8_lossy(&data)
    );
    println!("entries: {:?}", backend.readdir("demo", 0, 16).await?);

    backend.unlink("demo/greeting.txt", attrs.size).await?;
    backend.rmdir("demo").await?;
    Ok(())
}
