//! Bounded retry for optimistic convergence.
//!
//! An attempt recomputes some derived state, writes it, and validates it
//! against a fresh snapshot. It returns `Ok(true)` when the snapshot matched
//! and `Ok(false)` when the world moved underneath it. Attempts run back to
//! back; there is no backoff because a retry always starts from a reload.

use std::future::Future;

use tessera_core::{ConvergenceConfig, StorageError, TesseraResult};

/// How many times to retry a drifting attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ConvergenceConfig::default())
    }
}

impl From<&ConvergenceConfig> for RetryPolicy {
    fn from(config: &ConvergenceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `attempt` until it reports convergence.
///
/// `attempt` receives the zero-based attempt number. Returns the number of
/// attempts made, or `ConvergenceExhausted` once `max_retries` retries have
/// drifted. Errors from an attempt are returned immediately.
pub async fn retry_until_converged<F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> TesseraResult<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TesseraResult<bool>>,
{
    let max_attempts = policy.max_attempts();
    for n in 0..max_attempts {
        if attempt(n).await? {
            return Ok(n + 1);
        }
        if n + 1 < max_attempts {
            tracing::debug!(operation, attempt = n + 1, "state drifted during convergence, retrying");
        }
    }

    tracing::error!(operation, attempts = max_attempts, "convergence retries exhausted");
    Err(StorageError::ConvergenceExhausted {
        operation: operation.to_string(),
        attempts: max_attempts,
    }
    .into())
}
