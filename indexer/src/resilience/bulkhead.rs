use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Bulkhead settings: bounded concurrency plus a bounded wait queue.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub max_concurrent: usize,
    pub queue_size: usize,
    /// Maximum time a caller may wait for a slot.
    pub timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            queue_size: 100,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The call was rejected: either the queue was already full, or the
/// wait deadline passed before a slot freed up.
#[derive(Debug)]
pub struct BulkheadRejection {
    pub active: usize,
    pub queued: usize,
}

/// Observable snapshot, served on the monitoring surface.
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    queued: AtomicUsize,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            semaphore,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
        }
    }

    /// Run `fut` under the concurrency bound. The future is not polled
    /// until a slot is held.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, BulkheadRejection> {
        // reject outright when both slots and queue are exhausted
        if self.semaphore.available_permits() == 0
            && self.queued.load(Ordering::Acquire) >= self.config.queue_size
        {
            return Err(self.rejection());
        }

        self.queued.fetch_add(1, Ordering::AcqRel);
        let permit = match timeout(self.config.timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                permit
            }
            // semaphore never closes, but don't leak the queue slot
            Ok(Err(_)) | Err(_) => {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                return Err(self.rejection());
            }
        };

        self.active.fetch_add(1, Ordering::AcqRel);
        let output = fut.await;
        self.active.fetch_sub(1, Ordering::AcqRel);
        drop(permit);

        Ok(output)
    }

    fn rejection(&self) -> BulkheadRejection {
        BulkheadRejection {
            active: self.active.load(Ordering::Acquire),
            queued: self.queued.load(Ordering::Acquire),
        }
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            active: self.active.load(Ordering::Acquire),
            queued: self.queued.load(Ordering::Acquire),
            max_concurrent: self.config.max_concurrent,
            queue_capacity: self.config.queue_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig {
            max_concurrent: 3,
            queue_size: 100,
            timeout: Duration::from_secs(5),
        }));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let bulkhead = bulkhead.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                bulkhead
                    .run(async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_rejects_when_queue_full() {
        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig {
            max_concurrent: 1,
            queue_size: 0,
            timeout: Duration::from_secs(5),
        }));

        let blocker = bulkhead.clone();
        let handle = tokio::spawn(async move {
            blocker
                .run(async {
                    sleep(Duration::from_millis(200)).await;
                })
                .await
                .unwrap();
        });

        // give the blocking task time to take the only slot
        sleep(Duration::from_millis(50)).await;
        let rejected = bulkhead.run(async {}).await;
        assert!(rejected.is_err());

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_after_wait_deadline() {
        let bulkhead = Arc::new(Bulkhead::new(BulkheadConfig {
            max_concurrent: 1,
            queue_size: 10,
            timeout: Duration::from_millis(20),
        }));

        let blocker = bulkhead.clone();
        let handle = tokio::spawn(async move {
            blocker
                .run(async {
                    sleep(Duration::from_millis(300)).await;
                })
                .await
                .unwrap();
        });

        sleep(Duration::from_millis(50)).await;
        // queue has room, but the slot won't free within the deadline
        let rejected = bulkhead.run(async {}).await;
        assert!(rejected.is_err());

        handle.await.unwrap();
    }
}
