//! # Bounded Worker Pool
//!
//! Executes submitted jobs off the calling path with bounded concurrency
//! and a bounded queue. A dispatcher task drains the queue and runs each
//! job under a semaphore permit; a panicking job is caught at the pool
//! boundary and never takes a worker down with it.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error};

use crate::config::PoolConfig;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Errors from job submission.
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("worker pool {pool} queue is full")]
    QueueFull { pool: String },

    #[error("worker pool {pool} is shut down")]
    Closed { pool: String },
}

#[derive(Default)]
struct PoolStats {
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub submitted: u64,
    pub executed: u64,
    pub panicked: u64,
}

/// Bounded job executor.
#[derive(Clone)]
pub struct WorkerPool {
    name: Arc<String>,
    tx: mpsc::Sender<Job>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Start a pool with `config.workers` concurrent jobs and a
    /// `config.queue_depth`-deep submission queue.
    pub fn start(name: impl Into<String>, config: PoolConfig) -> Self {
        let name = Arc::new(name.into());
        let stats = Arc::new(PoolStats::default());
        let (tx, mut rx) = mpsc::channel::<Job>(config.queue_depth.max(1));
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));

        let pool_name = name.clone();
        let pool_stats = stats.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // Closing the semaphore is not part of the pool's
                // lifecycle, so acquire cannot fail here.
                let permit = semaphore.clone().acquire_owned().await.expect("pool semaphore closed");
                let job_name = pool_name.clone();
                let job_stats = pool_stats.clone();
                tokio::spawn(async move {
                    let result = AssertUnwindSafe(job).catch_unwind().await;
                    job_stats.executed.fetch_add(1, Ordering::Relaxed);
                    if let Err(panic) = result {
                        job_stats.panicked.fetch_add(1, Ordering::Relaxed);
                        error!(
                            pool = %job_name,
                            panic = %panic_message(&panic),
                            "job panicked; worker pool continues"
                        );
                    }
                    drop(permit);
                });
            }
            debug!(pool = %pool_name, "worker pool dispatcher stopped");
        });

        Self { name, tx, stats }
    }

    /// Queue a job for execution. Fails fast when the queue is full
    /// rather than blocking the caller.
    pub fn submit<F>(&self, job: F) -> Result<(), WorkerPoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tx.try_send(Box::pin(job)) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(WorkerPoolError::QueueFull {
                pool: self.name.as_ref().clone(),
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(WorkerPoolError::Closed {
                pool: self.name.as_ref().clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            executed: self.stats.executed.load(Ordering::Relaxed),
            panicked: self.stats.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Best-effort extraction of a panic payload message.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn small_pool(workers: usize, queue_depth: usize) -> WorkerPool {
        WorkerPool::start(
            "test",
            PoolConfig {
                workers,
                queue_depth,
            },
        )
    }

    #[tokio::test]
    async fn jobs_execute() {
        let pool = small_pool(2, 16);
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(42);
        })
        .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_the_pool() {
        let pool = small_pool(1, 16);
        pool.submit(async { panic!("job exploded") }).unwrap();

        // The pool keeps serving jobs after the panic.
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(());
        })
        .unwrap();
        rx.await.unwrap();

        // Stats eventually reflect the panic.
        let mut waited = 0;
        loop {
            let snapshot = pool.snapshot();
            if snapshot.panicked == 1 {
                break;
            }
            waited += 1;
            assert!(waited < 100, "panic never counted: {snapshot:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn full_queue_rejects_submission() {
        let pool = small_pool(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        // Occupy the single worker.
        pool.submit(async move {
            let _ = release_rx.await;
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The dispatcher holds one dequeued job while waiting for a
        // permit, so it takes two more submissions to fill the queue.
        pool.submit(async {}).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.submit(async {}).unwrap();

        let overflow = pool.submit(async {});
        assert!(matches!(
            overflow,
            Err(WorkerPoolError::QueueFull { .. })
        ));

        let _ = release_tx.send(());
    }
}
