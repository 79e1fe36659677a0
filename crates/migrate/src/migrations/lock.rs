//! Cross-process migration lock
//!
//! Only one invocation may plan and execute against a database at a time.
//! The lock is keyed by the state table name, so independent state tables in
//! one database do not block each other.

use std::time::{Duration, Instant};

use crate::backends::DatabaseBackend;
use crate::error::{MigrateResult, MigrationError};

/// A held migration lock. Must be released with [`MigrationLock::release`].
#[derive(Debug)]
#[must_use = "the migration lock must be released"]
pub struct MigrationLock {
    key: String,
    acquired_at: Instant,
}

impl MigrationLock {
    /// Poll for the lock until it is acquired or `timeout` passes
    pub async fn acquire(
        backend: &mut dyn DatabaseBackend,
        key: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> MigrateResult<Self> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if backend.try_lock(key).await? {
                tracing::debug!(key, attempts, "Acquired migration lock");
                return Ok(Self {
                    key: key.to_string(),
                    acquired_at: Instant::now(),
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(MigrationError::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }

            if attempts == 1 {
                tracing::info!(key, "Waiting for another migration run to release the lock");
            }
            tokio::time::sleep(poll_interval.min(timeout - waited)).await;
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock
    pub async fn release(self, backend: &mut dyn DatabaseBackend) -> MigrateResult<()> {
        backend.unlock(&self.key).await?;
        tracing::debug!(
            key = %self.key,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Released migration lock"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_second_holder_times_out() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("lock.db").display());
        let mut first = SqliteBackend::connect(&url, Duration::from_secs(5)).await.unwrap();
        let mut second = SqliteBackend::connect(&url, Duration::from_secs(5)).await.unwrap();

        let lock = MigrationLock::acquire(&mut first, "m", Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();

        let err = MigrationLock::acquire(&mut second, "m", Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::LockTimeout { ref key, .. } if key == "m"));

        lock.release(&mut first).await.unwrap();
        let lock = MigrationLock::acquire(&mut second, "m", Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(lock.key(), "m");
        lock.release(&mut second).await.unwrap();
    }
}
