use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};

/// Concurrency discipline for workflow runs: a global permit pool bounds
/// parallel workflows, and a per-thread mutex guarantees no two nodes of the
/// same thread id ever execute concurrently. Queued duplicate runs simply
/// re-read the checkpoint and fall through idempotent nodes.
#[derive(Clone)]
pub struct ActiveWorkflows {
    permits: Arc<Semaphore>,
    threads: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ActiveWorkflows {
    pub fn new(max_concurrent: usize) -> Self {
        ActiveWorkflows {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            threads: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.threads
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn run_serialized<F, Fut, T>(&self, thread_id: &str, run: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("workflow semaphore closed");
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;
        run().await
    }

    /// Drops the per-thread lock entry once a workflow reaches a terminal
    /// step; the map would otherwise grow with every processed mail.
    pub fn forget(&self, thread_id: &str) {
        self.threads.remove(thread_id);
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_thread_runs_serialize() {
        let active = ActiveWorkflows::new(8);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let active = active.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                active
                    .run_serialized("thread-1", || async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_global_bound_caps_distinct_threads() {
        let active = ActiveWorkflows::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let active = active.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let thread_id = format!("thread-{i}");
                active
                    .run_serialized(&thread_id, || async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
