//! Retry and backoff policy.
//!
//! Segment failures are classified by `DownloadError::is_retryable`; this
//! module decides how long to wait before the coordinator re-issues the
//! segment. Retry policy is centralized here so workers never retry locally.

use crate::error::DownloadError;
use std::time::Duration;

/// Exponential backoff with caps, plus the `Retry-After` override for 429.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive retryable failures allowed per segment before the task
    /// transitions to `Failed`.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base_delay * 2^(n-1)`, capped.
    pub base_delay: Duration,
    /// Upper bound on the computed backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Decide the delay before re-issuing a segment after its `attempt`-th
    /// consecutive retryable failure (1-based). `None` means stop retrying:
    /// either the error is not retryable or the budget is exhausted.
    ///
    /// A server-specified `Retry-After` (HTTP 429 only) overrides the
    /// computed exponential delay for the next attempt.
    pub fn decide(&self, attempt: u32, error: &DownloadError) -> Option<Duration> {
        if !error.is_retryable() || attempt > self.max_retries {
            return None;
        }
        if let Some(server_delay) = error.retry_after() {
            return Some(server_delay);
        }
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        Some(self.base_delay.saturating_mul(exp).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(code: u16, retry_after: Option<u64>) -> DownloadError {
        DownloadError::Http { code, retry_after }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        };
        let e = DownloadError::network("reset");
        assert_eq!(p.decide(1, &e), Some(Duration::from_millis(250)));
        assert_eq!(p.decide(2, &e), Some(Duration::from_millis(500)));
        assert_eq!(p.decide(3, &e), Some(Duration::from_millis(1000)));
        assert_eq!(p.decide(4, &e), Some(Duration::from_secs(2)));
        assert_eq!(p.decide(9, &e), Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_after_overrides_backoff_for_429() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(1, &http(429, Some(60))),
            Some(Duration::from_secs(60))
        );
        // A 500 with a Retry-After header still uses computed backoff.
        assert_eq!(p.decide(1, &http(500, Some(60))), Some(p.base_delay));
    }

    #[test]
    fn budget_exhaustion_stops_retries() {
        let p = RetryPolicy {
            max_retries: 3,
            ..Default::default()
        };
        let e = DownloadError::network("timeout");
        assert!(p.decide(3, &e).is_some());
        assert_eq!(p.decide(4, &e), None);
    }

    #[test]
    fn non_retryable_errors_never_wait() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, &http(404, None)), None);
        assert_eq!(p.decide(1, &DownloadError::storage("disk full")), None);
        assert_eq!(p.decide(1, &DownloadError::Canceled), None);
    }
}
