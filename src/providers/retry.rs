//! Bounded retry with exponential backoff and full jitter for provider calls.
//!
//! Every attempt runs under its own timeout so a hung connection can never
//! outlive the policy. Only transient [`ProviderError`]s are retried.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on a single attempt
    pub request_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_attempts: cfg.retry_max_attempts.max(1),
            base_delay_ms: cfg.retry_base_delay_ms,
            max_delay_ms: cfg.retry_max_delay_ms.max(cfg.retry_base_delay_ms),
            request_timeout: Duration::from_secs(cfg.provider_timeout_secs),
        }
    }

    /// `min(max_delay, base * 2^(attempt-1))`, before jitter.
    pub fn ceiling_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let multiplier = if exponent >= 32 { u64::MAX } else { 1u64 << exponent };
        self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms)
    }

    /// Full jitter: uniform in `[0, ceiling)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let ceiling = self.ceiling_ms(attempt);
        if ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..ceiling)
        }
    }

    /// Delay before the next attempt. A 429 with `Retry-After` waits what the
    /// upstream asked for, capped at `max_delay_ms`.
    fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        let ms = match err {
            ProviderError::RateLimited { retry_after_secs: Some(secs) } => {
                secs.saturating_mul(1000).min(self.max_delay_ms)
            }
            _ => self.backoff_ms(attempt),
        };
        Duration::from_millis(ms)
    }
}

pub async fn call_with_retry<T, Fut, F>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let start = Instant::now();
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(policy.request_timeout, operation()).await {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout {
                after_ms: policy.request_timeout.as_millis() as u64,
            }),
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = op_name, attempt, elapsed_ms = start.elapsed().as_millis() as u64, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            debug!(op = op_name, attempt, error = %err, "non-transient provider error, not retrying");
            return Err(err);
        }

        if attempt >= policy.max_attempts {
            warn!(
                op = op_name,
                attempts = attempt,
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = %err,
                "retries exhausted"
            );
            return Err(err);
        }

        let delay = policy.delay_for(attempt, &err);
        debug!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient provider error, backing off");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
