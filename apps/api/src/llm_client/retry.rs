//! Retry and deadline combinators shared by every external call site.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::LlmError;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay before the attempt following failed attempt `attempt` (1-based):
/// `base * 2^(attempt - 1)`, no jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

/// Runs `task` up to `attempts` times (at least once), sleeping with exponential
/// backoff between failures. The last error is returned once attempts run out.
///
/// `task` receives the 1-based attempt number.
pub async fn with_retry<T, E, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut task: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match task(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = backoff_delay(base_delay, attempt);
                warn!(
                    "Attempt {}/{} failed: {}; retrying after {}ms",
                    attempt,
                    attempts,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Bounds a single provider call. The timer lives on the tokio clock and is
/// dropped with the call, so a pending deadline never holds the runtime open.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(limit)),
    }
}
