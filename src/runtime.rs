//! Runtime abstraction layer for async operations
//!
//! Components receive an [`AsyncSpawner`] at construction instead of looking
//! up a global runtime, so the same pipeline code runs under an application
//! runtime, a test runtime or a dedicated worker runtime.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};
use rayon::prelude::*;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::{MapError, Result};

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(&self, future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Cancel the task
    fn cancel(&self);
}

/// Convenience wrapper for spawning with type safety
pub fn spawn<F>(spawner: &dyn AsyncSpawner, future: F) -> Box<dyn AsyncHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    spawner.spawn_boxed(future.boxed())
}

/// Tokio-based async spawner bound to one runtime.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: Handle,
}

impl TokioSpawner {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Spawner for the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current().map(Self::new).map_err(|e| {
            MapError::ConfigurationError(format!("no tokio runtime available: {}", e))
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl AsyncSpawner for TokioSpawner {
    fn spawn_boxed(&self, future: BoxFuture<'static, ()>) -> Box<dyn AsyncHandle> {
        Box::new(TokioHandle(self.handle.spawn(future)))
    }
}

struct TokioHandle(JoinHandle<()>);

impl AsyncHandle for TokioHandle {
    fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    fn cancel(&self) {
        self.0.abort();
    }
}

/// Runs CPU-bound work on the blocking pool of the current runtime.
pub async fn execute_blocking<F, R>(task: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(MapError::Cancelled),
        Err(e) => Err(MapError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("blocking task failed: {}", e),
        ))),
    }
}

/// Splits a row-major 2D buffer into one contiguous block of rows per worker
/// thread and runs `process(first_row, rows)` on each block in parallel.
/// Returns once every block is done.
pub fn partition_rows<T, F>(data: &mut [T], row_len: usize, process: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Send + Sync,
{
    if row_len == 0 || data.is_empty() {
        return;
    }
    let rows = data.len() / row_len;
    let workers = rayon::current_num_threads().max(1);
    let rows_per_block = ((rows + workers - 1) / workers).max(1);

    data.par_chunks_mut(rows_per_block * row_len)
        .enumerate()
        .for_each(|(block, chunk)| process(block * rows_per_block, chunk));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tokio_spawner() {
        let spawner = TokioSpawner::current().unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = spawn(&spawner, async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(handle.is_finished());
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_aborts_task() {
        let spawner = TokioSpawner::current().unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let handle = spawn(&spawner, async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
        });
        handle.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_current_outside_runtime_is_configuration_error() {
        assert!(matches!(
            TokioSpawner::current(),
            Err(MapError::ConfigurationError(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_blocking() {
        let value = execute_blocking(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
        let err = execute_blocking::<_, ()>(|| Err(MapError::ParseFailure("bad".into()))).await;
        assert!(matches!(err, Err(MapError::ParseFailure(_))));
    }

    #[test]
    fn test_partition_rows_covers_every_row_once() {
        let (rows, cols) = (37, 5);
        let mut grid = vec![0usize; rows * cols];
        partition_rows(&mut grid, cols, |first_row, block| {
            for (i, row) in block.chunks_mut(cols).enumerate() {
                for cell in row.iter_mut() {
                    *cell += first_row + i + 1;
                }
            }
        });
        for (r, row) in grid.chunks(cols).enumerate() {
            assert!(row.iter().all(|&v| v == r + 1));
        }
    }
}
