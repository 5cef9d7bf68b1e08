//! Bounded fire-and-forget job queue drained by a fixed worker pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Notify};

type BoxedJob = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

struct Job {
    name: &'static str,
    future: BoxedJob,
}

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
    pub pending: u64,
}

/// Cloneable handle to the job queue. Workers stop once every handle is dropped.
#[derive(Clone)]
pub struct BackgroundQueue {
    sender: mpsc::Sender<Job>,
    counters: Arc<QueueCounters>,
    idle: Arc<Notify>,
}

impl BackgroundQueue {
    /// Spawn `workers` tasks on the current runtime.
    ///
    /// Must be called from inside a tokio runtime.
    #[must_use]
    pub fn start(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(QueueCounters::default());
        let idle = Arc::new(Notify::new());

        let workers = workers.max(1);
        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let counters = Arc::clone(&counters);
            let idle = Arc::clone(&idle);
            tokio::spawn(async move {
                tracing::debug!(worker_id, "background worker started");
                loop {
                    let next = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    let Some(job) = next else {
                        break;
                    };

                    let name = job.name;
                    match tokio::spawn(job.future).await {
                        Ok(Ok(())) => {
                            counters.succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(err)) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(job = name, error = %err, "background job failed");
                        }
                        Err(err) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(job = name, error = %err, "background job panicked");
                        }
                    }
                    counters.pending.fetch_sub(1, Ordering::AcqRel);
                    idle.notify_waiters();
                }
                tracing::debug!(worker_id, "background worker stopped");
            });
        }

        tracing::info!(workers, capacity, "background queue started");
        Self { sender, counters, idle }
    }

    /// Enqueue a job without waiting. Returns `false` when it was dropped.
    pub fn submit<F>(&self, name: &'static str, future: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(Job { name, future: Box::pin(future) }) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.counters.pending.fetch_sub(1, Ordering::AcqRel);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "queue closed",
                };
                tracing::warn!(job = name, reason, "background job dropped");
                self.idle.notify_waiters();
                false
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Acquire),
        }
    }

    /// Resolve once no job is queued or running, including jobs enqueued by other jobs.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.counters.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn jobs_run_and_failures_are_counted() {
        let queue = BackgroundQueue::start(2, 16);
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let hits = Arc::clone(&hits);
            assert!(queue.submit("count", async move {
                hits.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }));
        }
        assert!(queue.submit("broken", async { Err::<(), _>(anyhow::anyhow!("ledger down")) }));

        queue.wait_idle().await;
        let stats = queue.stats();
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.succeeded, 5);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let queue = BackgroundQueue::start(1, 1);
        let gate = Arc::new(Notify::new());

        let blocker = Arc::clone(&gate);
        assert!(queue.submit("blocker", async move {
            blocker.notified().await;
            anyhow::Ok(())
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(queue.submit("queued", async { anyhow::Ok(()) }));
        assert!(!queue.submit("overflow", async { anyhow::Ok(()) }));
        assert_eq!(queue.stats().dropped, 1);

        gate.notify_one();
        queue.wait_idle().await;
        let stats = queue.stats();
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn wait_idle_covers_jobs_spawned_by_jobs() {
        let queue = BackgroundQueue::start(1, 8);
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_queue = queue.clone();
        let inner_hits = Arc::clone(&hits);
        assert!(queue.submit("outer", async move {
            inner_queue.submit("inner", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                inner_hits.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            });
            anyhow::Ok(())
        }));

        queue.wait_idle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_the_worker() {
        let queue = BackgroundQueue::start(1, 4);
        assert!(queue.submit("panics", async {
            let explode = true;
            if explode {
                panic!("boom");
            }
            anyhow::Ok(())
        }));
        assert!(queue.submit("after", async { anyhow::Ok(()) }));

        queue.wait_idle().await;
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
    }
}
