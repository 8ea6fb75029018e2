//! # Retry Policy
//!
//! Exponential backoff with optional jitter for outbound HTTP. The policy is
//! a plain value; `retry_async` is the combinator that applies it to an
//! async operation and re-raises the final error.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// Error surfaced by a retried request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl RequestError {
    /// Transient failures worth retrying: connect errors, timeouts, generic
    /// network errors, and HTTP 5xx / 429. Everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Http(err) => {
                if err.is_connect() || err.is_timeout() {
                    return true;
                }
                if let Some(status) = err.status() {
                    return status.is_server_error() || status.as_u16() == 429;
                }
                // Status-less errors are transport-level (reset, broken pipe)
                // unless they came from building or decoding the request.
                !err.is_builder() && !err.is_decode() && !err.is_redirect()
            }
            RequestError::Malformed(_) => false,
        }
    }
}

/// Backoff configuration. Delay for attempt n (1-based) is
/// `min(base * expo^(n-1), cap)`, optionally scaled by a uniform sample in
/// [0.5, 1.5].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Low-latency profile for queue deliveries and notifier pushes.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: true,
        }
    }

    /// Tolerant profile for upstream forwarding.
    pub fn patient() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }

    /// Best-effort profile for must-deliver operations.
    pub fn critical() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            exponential_base: 2.0,
            jitter: true,
        }
    }

    /// Delay before the retry following attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(scaled)
    }
}

/// Run `operation` up to `policy.max_attempts` times, sleeping between
/// attempts. Non-retryable errors and the final failure are re-raised.
pub async fn retry_async<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    warn!("non-retryable error: {}", err);
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    error!("failed after {} attempts: {}", policy.max_attempts, err);
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "attempt {}/{} failed: {}. retrying in {:.2}s",
                    attempt,
                    policy.max_attempts,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            exponential_base: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        // Capped from here on
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for(8), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_half_to_one_and_a_half() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        };

        for _ in 0..100 {
            let delay = policy.delay_for(1).as_secs_f64();
            assert!(delay >= 1.0 && delay < 3.0, "delay out of range: {delay}");
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result = retry_async(&no_jitter(5), move || {
            let calls = calls_ref.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    // Timeouts are retryable
                    Err(make_timeout_error().await)
                } else {
                    Ok(42_u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<(), _> = retry_async(&no_jitter(3), move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(make_timeout_error().await)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = calls.clone();

        let result: Result<(), _> = retry_async(&no_jitter(5), move || {
            let calls = calls_ref.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RequestError::Malformed("missing field".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Manufacture a real reqwest timeout by racing a connect against a
    /// one-millisecond budget on an unroutable address.
    async fn make_timeout_error() -> RequestError {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(1))
            .build()
            .unwrap();
        let err = client
            .get("http://10.255.255.1:9/")
            .send()
            .await
            .expect_err("request must fail");
        RequestError::Http(err)
    }
}
