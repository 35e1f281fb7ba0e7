//! Bounded worker pools.
//!
//! Render work and cache backend I/O each get their own pool so a burst of
//! slow renders never starves cache round trips, and vice versa. A job that
//! has been handed to a pool keeps its permit until it finishes, even when
//! the caller that submitted it stops waiting.

use std::{future::Future, num::NonZeroUsize, sync::Arc};

use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error, Clone)]
pub enum PoolError {
    #[error("worker pool `{pool}` is closed")]
    Closed { pool: &'static str },
    #[error("worker in pool `{pool}` failed: {message}")]
    Join { pool: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: NonZeroUsize) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(size.get())),
        }
    }

    /// Number of workers currently idle.
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run a CPU-bound job on a blocking thread once a worker is free.
    pub async fn run_blocking<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed { pool: self.name })?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|err| PoolError::Join {
            pool: self.name,
            message: err.to_string(),
        })
    }

    /// Await an I/O future while holding one of the pool's workers.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PoolError::Closed { pool: self.name })?;
        Ok(job.await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn pool(size: usize) -> WorkerPool {
        WorkerPool::new("test", NonZeroUsize::new(size).expect("non-zero pool size"))
    }

    #[tokio::test]
    async fn run_blocking_returns_job_output() {
        let pool = pool(2);
        let value = pool.run_blocking(|| 21 * 2).await.expect("job result");
        assert_eq!(value, 42);
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn run_blocking_reports_panics_as_join_errors() {
        let pool = pool(1);
        let err = pool
            .run_blocking(|| -> u8 { panic!("boom") })
            .await
            .expect_err("panicking job should fail");
        assert!(matches!(err, PoolError::Join { pool: "test", .. }));
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_pool_size() {
        let pool = pool(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run_blocking(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.expect("task").expect("job");
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
