//! Execution contexts that run blocking native calls off the caller's thread.
//!
//! Every driver operation is packaged as a [`Task`] and handed to an
//! [`ExecutionContext`]. [`submit`] returns a future resolving to the task's
//! result, so callers only ever suspend at the await point while the worker
//! blocks on the native call.
//!
//! Two contexts are provided:
//!
//! - [`WorkerPool`]: a fixed set of dedicated OS threads with a shared queue.
//!   Used by drivers whose client library wants its own threads.
//! - [`RuntimeBlocking`]: forwards to the tokio blocking pool of a runtime.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{ErrorCode, FsError};

/// A unit of blocking work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that accepts blocking work and runs it eventually.
///
/// Implementations may drop a task without running it (for instance after
/// shutdown); [`submit`] turns that into an error for the waiting caller.
pub trait ExecutionContext: Send + Sync {
    /// Schedules `task`.
    fn execute(&self, task: Task);
}

impl<T: ExecutionContext + ?Sized> ExecutionContext for Arc<T> {
    fn execute(&self, task: Task) {
        (**self).execute(task);
    }
}

/// Runs `call` on `ctx` and returns a future for its result.
///
/// The task is scheduled before this function returns; the returned future
/// does not borrow `ctx`. If the context drops the task, or the task panics,
/// the future resolves to [`ErrorCode::Io`].
pub fn submit<T, F>(
    ctx: &dyn ExecutionContext,
    operation: &'static str,
    call: F,
) -> impl Future<Output = Result<T, FsError>> + Send + use<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FsError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    ctx.execute(Box::new(move || {
        // The receiver may be gone if the caller stopped waiting.
        let _ = tx.send(call());
    }));
    async move {
        rx.await.unwrap_or_else(|_| {
            Err(FsError::with_message(
                ErrorCode::Io,
                operation,
                "execution context dropped the task",
            ))
        })
    }
}

struct State {
    queue: VecDeque<Task>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

/// A fixed-size pool of named worker threads.
///
/// Dropping the pool lets the workers finish every queued task, then joins
/// them.
pub struct WorkerPool {
    name: String,
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `threads` workers named `<name>-<index>`.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::InvalidArgument`] if `threads` is zero, or the OS error
    /// if a thread cannot be spawned.
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, FsError> {
        let name = name.into();
        if threads == 0 {
            return Err(FsError::with_message(
                ErrorCode::InvalidArgument,
                "worker_pool",
                "a worker pool needs at least one thread",
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let mut pool = Self {
            name,
            shared,
            workers: Vec::with_capacity(threads),
        };
        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let worker = thread::Builder::new()
                .name(format!("{}-{index}", pool.name))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| FsError::io("worker_pool", &e))?;
            pool.workers.push(worker);
        }
        debug!(pool = %pool.name, threads, "started worker pool");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Name prefix of the worker threads.
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                if state.shutdown {
                    return;
                }
                shared.available.wait(&mut state);
            }
        };
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!(
                worker = thread::current().name().unwrap_or("worker"),
                "task panicked"
            );
        }
    }
}

impl ExecutionContext for WorkerPool {
    fn execute(&self, task: Task) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.queue.push_back(task);
        drop(state);
        self.shared.available.notify_one();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.available.notify_all();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last reference may be dropped by one of our own workers.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!(pool = %self.name, "worker thread panicked");
            }
        }
        debug!(pool = %self.name, "stopped worker pool");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.workers.len())
            .finish()
    }
}

/// Runs tasks on the blocking pool of a tokio runtime.
#[derive(Debug, Clone)]
pub struct RuntimeBlocking {
    handle: Handle,
}

impl RuntimeBlocking {
    /// Uses the runtime behind `handle`.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running inside, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl ExecutionContext for RuntimeBlocking {
    fn execute(&self, task: Task) {
        drop(self.handle.spawn_blocking(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn submit_returns_task_result() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let out = submit(&pool, "op", || Ok(21 * 2)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn submit_propagates_task_error() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let err = submit::<(), _>(&pool, "op", || Err(FsError::from_errno(libc::ENOENT, "op")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn tasks_run_on_named_workers() {
        let pool = WorkerPool::new("dfs", 1).unwrap();
        let name = submit(&pool, "op", || {
            Ok(thread::current().name().map(str::to_string))
        })
        .await
        .unwrap();
        assert_eq!(name.as_deref(), Some("dfs-0"));
    }

    #[tokio::test]
    async fn panicking_task_resolves_to_io_error() {
        let pool = WorkerPool::new("test", 1).unwrap();
        let err = submit::<(), _>(&pool, "read", || panic!("boom")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.operation(), "read");

        // The worker survives the panic.
        assert_eq!(submit(&pool, "op", || Ok(1)).await.unwrap(), 1);
    }

    #[test]
    fn workers_run_in_parallel() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let barrier = Arc::new(Barrier::new(3));
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            pool.execute(Box::new(move || {
                barrier.wait();
            }));
        }
        // Deadlocks unless both tasks are running at the same time.
        barrier.wait();
    }

    #[test]
    fn drop_drains_queue() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new("test", 1).unwrap();
            for _ in 0..16 {
                let done = Arc::clone(&done);
                pool.execute(Box::new(move || {
                    thread::sleep(Duration::from_millis(1));
                    done.fetch_add(1, Ordering::SeqCst);
                }));
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn zero_threads_rejected() {
        let err = WorkerPool::new("test", 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn dropped_task_resolves_to_error() {
        struct Discard;
        impl ExecutionContext for Discard {
            fn execute(&self, _task: Task) {}
        }
        let err = submit(&Discard, "open", || Ok(())).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);
    }

    #[tokio::test]
    async fn runtime_blocking_runs_tasks() {
        let ctx = RuntimeBlocking::current().unwrap();
        let out = submit(&ctx, "op", || Ok("done")).await.unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn runtime_blocking_needs_a_runtime() {
        assert!(RuntimeBlocking::current().is_none());
    }
}
