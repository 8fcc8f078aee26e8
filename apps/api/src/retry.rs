//! Timeout and retry policy shared by every embedding and LLM backend call.
//!
//! Backends make a single attempt per call; this module owns the deadline,
//! the retry budget and the exponential backoff between attempts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl CallPolicy {
    fn delay_for(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(1 << retry.min(16))
    }
}

/// Runs `op` under `policy`.
///
/// Each attempt is bounded by `policy.timeout`; an elapsed deadline becomes
/// `PipelineError::Timeout`. Retryable errors are retried up to
/// `policy.retries` times, everything else is returned immediately.
pub async fn call_with_policy<T, F, Fut>(
    policy: &CallPolicy,
    label: &str,
    mut op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut retry = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Timeout(policy.timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < policy.retries => {
                let delay = policy.delay_for(retry);
                warn!(
                    "{} attempt {} failed ({}), retrying after {}ms...",
                    label,
                    retry + 1,
                    e,
                    delay.as_millis()
                );
                retry += 1;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}
