//! Bounded retry for transient store failures
//!
//! SQLite reports lock contention between worker processes as `SQLITE_BUSY`
//! or `SQLITE_LOCKED`. Those errors are retried a fixed number of times with
//! a fixed delay; anything else, or the last failed attempt, is returned to
//! the caller.

use crate::storage::traits::StorageResult;
use std::time::Duration;

/// How often and how patiently to retry a transient store failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> StorageResult<T>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!(
                        "Transient store error during {} (attempt {}/{}): {}",
                        operation,
                        attempt,
                        self.attempts,
                        e
                    );
                    attempt += 1;
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StorageError;
    use rusqlite::ffi;

    fn busy() -> StorageError {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            None,
        ))
    }

    #[test]
    fn test_retries_transient_until_success() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;

        let result = policy.run("test", || {
            calls += 1;
            if calls < 3 {
                Err(busy())
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_after_attempts() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;

        let result: StorageResult<()> = policy.run("test", || {
            calls += 1;
            Err(busy())
        });

        assert!(result.is_err());
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;

        let result: StorageResult<()> = policy.run("test", || {
            calls += 1;
            Err(StorageError::Database("corrupt".into()))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
