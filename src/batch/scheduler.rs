//! Worker-slot scheduler for batch jobs.
//!
//! Caps how many processing jobs talk to the assistant service at once.
//! Permits release their slot when dropped.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// BatchScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Semaphore-backed limit on concurrent jobs.
#[derive(Clone)]
pub struct BatchScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl BatchScheduler {
    /// Creates a scheduler with `workers` slots.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `workers` is 0.
    pub fn new(workers: usize) -> Result<Self, AppError> {
        if workers == 0 {
            return Err(AppError::Config("batch workers must be >= 1".into()));
        }

        Ok(Self {
            sem: Arc::new(Semaphore::new(workers)),
            max: workers,
        })
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<WorkerPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("worker scheduler closed".into()))?;

        Ok(WorkerPermit { _permit: permit })
    }

    pub fn workers(&self) -> usize {
        self.max
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WorkerPermit
// ─────────────────────────────────────────────────────────────────────────────

/// A held worker slot, released on drop.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn zero_workers_is_config_error() {
        assert!(matches!(BatchScheduler::new(0), Err(AppError::Config(_))));
        assert_eq!(BatchScheduler::new(3).unwrap().workers(), 3);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let scheduler = BatchScheduler::new(1).unwrap();
        let held = scheduler.acquire().await.unwrap();

        let waiter = scheduler.clone();
        let handle = tokio::spawn(async move { waiter.acquire().await.map(|_| ()) });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished(), "second acquire should be blocked");

        drop(held);

        timeout(Duration::from_millis(200), handle)
            .await
            .expect("acquire should complete after release")
            .expect("task should not panic")
            .unwrap();
    }
}
