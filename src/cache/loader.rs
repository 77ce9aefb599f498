//! Loader/Writer Bridge Module
//!
//! Caller-supplied read-through and write-through callbacks, plus the worker
//! pool and handle type behind asynchronous load operations.

use std::collections::HashMap;
use std::sync::mpsc;
use std::time::Duration;

use tracing::debug;

use crate::cache::Entry;
use crate::error::{CacheError, Result};

// == Cache Loader ==
/// Read-through callback invoked on cache miss.
///
/// Implementations may block and may fail with a domain error; failures are
/// surfaced through the calling operation's error channel (or the load
/// handle for asynchronous loads), never swallowed. Retrying is a caller
/// concern.
pub trait CacheLoader<K, V>: Send + Sync {
    /// Loads the entry for a key. `Ok(None)` means "no such entry".
    fn load(&self, key: &K) -> anyhow::Result<Option<Entry<K, V>>>;

    /// Loads values for a batch of keys. Keys without a value are omitted
    /// from the result.
    fn load_all(&self, keys: &[K]) -> anyhow::Result<HashMap<K, V>>;
}

// == Cache Writer ==
/// Write-through callback invoked synchronously inside mutating operations.
///
/// The writer runs before the in-memory store is considered authoritative:
/// a writer failure fails the whole mutating call without changing the
/// visible cache state.
pub trait CacheWriter<K, V>: Send + Sync {
    /// Persists an entry before it is stored.
    fn write(&self, entry: &Entry<K, V>) -> anyhow::Result<()>;

    /// Persists a removal before the entry is dropped from the store.
    fn delete(&self, key: &K) -> anyhow::Result<()>;
}

// == Load Handle ==
/// Handle to an asynchronous load, carrying result-or-error and a
/// completion signal.
///
/// The load runs on a separate worker and is fully done by the time the
/// handle reports completion. Waiting blocks only the awaiting caller.
/// A timeout abandons the result without cancelling the worker: the load
/// may still complete and populate the store afterwards (at-least-once from
/// the caller's point of view).
#[derive(Debug)]
pub struct LoadHandle<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T> LoadHandle<T> {
    /// Blocks until the load completes and returns its result.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| CacheError::LoadTaskFailed("load worker dropped the result".into()))?
    }

    /// Blocks up to `timeout` for the load to complete.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CacheError::LoadTimeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(CacheError::LoadTaskFailed(
                "load worker dropped the result".into(),
            )),
        }
    }

    /// Returns the result if the load has already completed, without
    /// blocking. The handle is consumed only on completion.
    pub fn try_wait(&self) -> Option<Result<T>> {
        self.rx.try_recv().ok()
    }
}

// == Task Executor ==
/// Worker pool running asynchronous loads and the listener delivery worker.
///
/// Owns a dedicated tokio runtime sized from the cache configuration. Held
/// by the cache facade only, never by spawned tasks, so the runtime is
/// always dropped from a caller thread.
#[derive(Debug)]
pub struct TaskExecutor {
    runtime: tokio::runtime::Runtime,
}

impl TaskExecutor {
    /// Creates an executor with the given number of worker threads.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(CacheError::InvalidConfig(
                "load_workers must be at least 1".into(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("cache-load-worker")
            .enable_all()
            .build()
            .map_err(|e| CacheError::InvalidConfig(format!("failed to build runtime: {e}")))?;
        debug!("Started cache task executor with {} workers", workers);
        Ok(Self { runtime })
    }

    /// Runs a blocking job on the pool, returning a handle to its result.
    pub fn spawn<T, F>(&self, job: F) -> LoadHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.runtime.spawn_blocking(move || {
            // The receiver may already be gone if the caller abandoned the
            // handle; the load's side effects still happen.
            let _ = tx.send(job());
        });
        LoadHandle { rx }
    }

    /// Spawns a long-running async task on the pool.
    pub(crate) fn spawn_task<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }
}
