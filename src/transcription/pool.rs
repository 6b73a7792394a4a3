//! Bounded inference pool.
//!
//! Model inference is CPU-bound and would stall the actix event loop for its whole
//! duration. Jobs therefore run on tokio's blocking threads, with a semaphore
//! capping how many run at once so a burst of sessions cannot oversubscribe the
//! CPU or the memory budget.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct InferencePool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl InferencePool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Workers not currently running a job.
    pub fn idle_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on a blocking thread once a worker slot frees up.
    ///
    /// The permit moves into the blocking closure, so the slot stays taken until
    /// the job really finishes, even if the awaiting task is aborted meanwhile.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("inference pool is shut down"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| anyhow!("inference worker crashed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = InferencePool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.idle_workers(), 2);
    }

    #[tokio::test]
    async fn test_job_errors_propagate() {
        let pool = InferencePool::new(1);
        let err = pool.run(|| -> Result<()> { Err(anyhow!("decoder exploded")) }).await.unwrap_err();
        assert!(err.to_string().contains("decoder exploded"));
    }

    #[tokio::test]
    async fn test_panicking_job_is_reported() {
        let pool = InferencePool::new(1);
        let result = pool.run(|| -> Result<()> { panic!("boom") }).await;
        assert!(result.is_err());
        assert_eq!(pool.idle_workers(), 1);
    }
}
