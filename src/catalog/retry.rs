//! Exponential backoff for transient catalog failures

use crate::catalog::{CatalogError, CatalogResult};
use std::future::Future;
use std::time::Duration;

/// Retries transient catalog errors, doubling the delay after each attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
        }
    }

    /// Runs `call` until it succeeds, fails permanently, or retries run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> CatalogResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CatalogResult<T>>,
    {
        let mut delay = self.initial_delay;
        let mut retries = 0;

        loop {
            match call().await {
                Err(CatalogError::Transient(reason)) if retries < self.max_retries => {
                    retries += 1;
                    tracing::debug!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        operation,
                        reason,
                        retries,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                result => return result,
            }
        }
    }
}
