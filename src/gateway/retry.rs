//! Retry logic utilities for gateway operations
//!
//! This module provides exponential backoff and per-call timeout wrappers used
//! around every call into the blockchain data gateway.

use crate::config::GatewayConfig;
use crate::errors::{GatewayError, GatewayResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

/// Calculate next backoff duration using exponential backoff with a maximum cap
///
/// `new_backoff = min(current_backoff * multiplier, max_backoff)`
///
/// # Example
/// ```
/// use std::time::Duration;
/// use chain_forensics::gateway::calculate_next_backoff;
///
/// let backoff = Duration::from_millis(100);
/// let next = calculate_next_backoff(backoff, 2.0, Duration::from_secs(30));
/// assert_eq!(next, Duration::from_millis(200));
/// ```
pub fn calculate_next_backoff(
    current_backoff: Duration,
    multiplier: f64,
    max_backoff: Duration,
) -> Duration {
    Duration::from_millis((current_backoff.as_millis() as f64 * multiplier) as u64).min(max_backoff)
}

/// Bounded retry settings for gateway calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            call_timeout: config.request_timeout(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Run `call` under the per-call timeout, retrying transient failures
///
/// Non-transient errors (not found, unsupported, malformed data) return on the
/// first attempt. Exhausting the attempts yields `RetriesExhausted`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut attempts = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        attempts += 1;
        let outcome = match timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                timeout_ms: policy.call_timeout.as_millis() as u64,
                operation: operation.to_string(),
            }),
        };

        match outcome {
            Ok(value) => {
                if attempts > 1 {
                    debug!("{} succeeded after {} attempts", operation, attempts);
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                if attempts >= policy.max_attempts {
                    error!("{} failed after {} attempts: {}", operation, attempts, e);
                    return Err(GatewayError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts,
                        last_error: e.to_string(),
                    });
                }

                warn!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    operation, attempts, backoff, e
                );
                sleep(backoff).await;
                backoff = calculate_next_backoff(backoff, policy.multiplier, policy.max_backoff);
            }
        }
    }
}
