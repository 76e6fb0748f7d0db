// cr3restore/src/utils/retry.rs
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

/// Errors that know whether repeating the same call could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded exponential backoff applied to one network call at a time.
///
/// Never wrap a multi-step sequence (list, then copy) in a single `run`:
/// a retry must not re-decide anything with stale data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A single attempt with no retries.
    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) doubles each step; factor scales the first delay to base_delay.
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(MAX_BACKOFF)
            .map(jitter)
            .take(self.max_attempts - 1)
    }

    /// Runs `action`, retrying while it fails with a transient error.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + fmt::Display,
    {
        let mut attempt = 0usize;
        let max_attempts = self.max_attempts;

        RetryIf::spawn(
            self.backoff(),
            || {
                attempt += 1;
                if attempt > 1 {
                    debug!(operation, attempt, max_attempts, "Retrying call");
                }
                action()
            },
            |err: &E| {
                let retry = err.is_transient();
                if retry {
                    warn!(operation, "Transient failure: {err}");
                }
                retry
            },
        )
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200))
    }
}
