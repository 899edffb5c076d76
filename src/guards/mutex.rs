//! Process-wide single-writer mutex for local-interactive and multi-server
//! jobs (§4.5). FIFO acquisition with acquire/release timing logged so
//! queuing behavior is observable.

use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Held for the duration of a local-interactive or multi-server
/// invocation. Dropping it releases the mutex and logs the hold time.
pub struct WriterGuard {
    _guard: OwnedMutexGuard<()>,
    acquired_at: Instant,
    job_id: String,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        tracing::info!(
            job_id = %self.job_id,
            held_for_ms = self.acquired_at.elapsed().as_millis(),
            "global writer lock released"
        );
    }
}

/// A single `tokio::sync::Mutex` guarding the desktop application, which
/// is not safe for concurrent document-mutating operations.
#[derive(Default)]
pub struct GlobalWriterLock {
    inner: std::sync::Arc<Mutex<()>>,
}

impl GlobalWriterLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `job_id`, logging the queued-then-acquired
    /// timing. `tokio::sync::Mutex` grants ownership to waiters in the
    /// order they called `lock_owned`, giving the required FIFO ordering.
    pub async fn acquire(&self, job_id: &str) -> WriterGuard {
        let requested_at = Instant::now();
        let guard = self.inner.clone().lock_owned().await;
        let waited = requested_at.elapsed();
        tracing::info!(job_id, waited_ms = waited.as_millis(), "global writer lock acquired");
        WriterGuard {
            _guard: guard,
            acquired_at: Instant::now(),
            job_id: job_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_drop() {
        let lock = Arc::new(GlobalWriterLock::new());
        let guard = lock.acquire("job-1").await;

        let lock2 = lock.clone();
        let waiter = tokio::spawn(async move {
            let _g = lock2.acquire("job-2").await;
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn sequential_acquisitions_do_not_deadlock() {
        let lock = GlobalWriterLock::new();
        {
            let _g = lock.acquire("job-a").await;
        }
        let _g = lock.acquire("job-b").await;
    }
}
