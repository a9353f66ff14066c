/// Bounded execution pool
///
/// At most `capacity` sandboxes are alive at once. Callers queue for a slot
/// for at most `queue_timeout` and are then rejected with `ServiceError::Busy`.
/// Slots are released when the returned permit is dropped.

use crate::error::ServiceError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ExecutionPool {
    slots: Arc<Semaphore>,
    capacity: usize,
    queue_timeout: Duration,
}

impl ExecutionPool {
    pub fn new(capacity: usize, queue_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            queue_timeout,
        }
    }

    /// Wait for a free slot, bounded by the queue timeout
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, ServiceError> {
        match tokio::time::timeout(self.queue_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            // The semaphore is never closed; treat it like saturation if it ever is
            Ok(Err(_)) => Err(ServiceError::Busy(self.queue_timeout)),
            Err(_) => {
                warn!(
                    capacity = self.capacity,
                    queue_timeout_ms = self.queue_timeout.as_millis() as u64,
                    "Execution pool saturated, rejecting request"
                );
                Err(ServiceError::Busy(self.queue_timeout))
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool = ExecutionPool::new(2, Duration::from_millis(50));
        assert_eq!(pool.in_use(), 0);

        let first = pool.acquire().await.unwrap();
        let _second = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 2);

        drop(first);
        assert_eq!(pool.in_use(), 1);
    }

    #[tokio::test]
    async fn test_saturated_pool_reports_busy() {
        let pool = ExecutionPool::new(1, Duration::from_millis(20));
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ServiceError::Busy(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_waiter_gets_released_slot() {
        let pool = ExecutionPool::new(1, Duration::from_secs(1));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap());
    }
}
