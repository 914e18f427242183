//! Call-with-retry primitive for outbound RPCs
//!
//! Each attempt races the call against a fixed deadline. A timed out attempt
//! is dropped (closing its connection) and the whole call restarts against
//! the same address. Any other failure is returned immediately.

use crate::error::TransportError;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

/// Default per-attempt deadline
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Decides how long an attempt may take and whether to try again
pub trait RetryPolicy: Send + Sync + Debug {
    /// Deadline for a single attempt
    fn attempt_timeout(&self) -> Duration;

    /// Delay before the next attempt once `attempt` (1-based) timed out,
    /// or `None` to give up
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Retry forever against the same peer, no backoff
#[derive(Debug, Clone)]
pub struct UnboundedRetry {
    pub timeout: Duration,
}

impl UnboundedRetry {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for UnboundedRetry {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl RetryPolicy for UnboundedRetry {
    fn attempt_timeout(&self) -> Duration {
        self.timeout
    }

    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Finite attempts with a fixed delay between them
#[derive(Debug, Clone)]
pub struct BoundedRetry {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl BoundedRetry {
    pub fn new(timeout: Duration, max_attempts: u32, delay: Duration) -> Self {
        Self {
            timeout,
            max_attempts,
            delay,
        }
    }
}

impl RetryPolicy for BoundedRetry {
    fn attempt_timeout(&self) -> Duration {
        self.timeout
    }

    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

/// Run `call` until one attempt finishes inside the policy's deadline.
///
/// Returns the number of attempts used.
pub async fn call_with_retry<F, Fut>(
    policy: &dyn RetryPolicy,
    addr: &str,
    mut call: F,
) -> Result<u32, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match tokio::time::timeout(policy.attempt_timeout(), call()).await {
            Ok(Ok(())) => return Ok(attempt),
            Ok(Err(e)) => return Err(e),
            Err(_) => match policy.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        "Timeout calling {} (attempt {}), retrying...",
                        addr,
                        attempt
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                None => {
                    return Err(TransportError::RetriesExhausted {
                        addr: addr.to_string(),
                        attempts: attempt,
                    })
                }
            },
        }
    }
}
