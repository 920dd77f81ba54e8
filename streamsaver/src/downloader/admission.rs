//! Bounded admission queues.
//!
//! A queue hands out at most `capacity` permits at a time; the slot is given
//! back when the permit is dropped, on every exit path.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held admission slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionQueue {
    pub fn new(name: impl Into<Arc<str>>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a free slot. Waiters are not served in any particular order.
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("admission queue {} closed: {e}", self.name)))?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn permits_are_released_on_drop() {
        let queue = AdmissionQueue::new("host", 2);
        let a = queue.acquire().await.unwrap();
        let _b = queue.acquire().await.unwrap();
        assert_eq!(queue.in_use(), 2);
        assert!(queue.try_acquire().is_none());

        drop(a);
        assert_eq!(queue.available(), 1);
        assert!(queue.try_acquire().is_some());
    }

    async fn high_water_mark(capacity: usize, jobs: usize) -> usize {
        let queue = AdmissionQueue::new("test", capacity);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..jobs)
            .map(|_| {
                let queue = queue.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _permit = queue.acquire().await.unwrap();
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(queue.available(), capacity);
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn three_jobs_on_one_host_run_two_at_a_time() {
        assert_eq!(high_water_mark(2, 3).await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conversions_are_serialized() {
        assert_eq!(high_water_mark(1, 2).await, 1);
    }
}
