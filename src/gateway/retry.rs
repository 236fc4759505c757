//! Bounded exponential backoff for gateway calls
//!
//! Each attempt carries its own timeout; a timed-out call counts as a
//! transient failure. Terminal errors are returned immediately.

use crate::config::RetryConfig;
use crate::gateway::GatewayError;
use std::future::Future;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Run `op` until it succeeds, fails terminally, or attempts run out.
/// After the final attempt the last transient cause is surfaced as a
/// terminal error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    stage: &str,
    mut op: F,
) -> std::result::Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, GatewayError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut last_cause = String::new();

    for attempt in 1..=policy.max_attempts {
        match timeout(policy.call_timeout, op()).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(stage, attempt, "gateway call recovered");
                }
                return Ok(value);
            }
            Ok(Err(err @ GatewayError::Terminal(_))) => return Err(err),
            Ok(Err(GatewayError::Transient(cause))) => {
                warn!(stage, attempt, %cause, "transient gateway failure");
                last_cause = cause;
            }
            Err(_) => {
                warn!(stage, attempt, "gateway call timed out");
                last_cause = format!("timed out after {:?}", policy.call_timeout);
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(policy.max_backoff);
        }
    }

    Err(GatewayError::Terminal(format!(
        "{stage} failed after {} attempts: {last_cause}",
        policy.max_attempts
    )))
}
