//! Exponential-backoff reconnection to the broker.
//!
//! When the broker connection drops, the front-end calls
//! [`reconnect_loop`] to keep retrying with increasing delays until either
//! the connection is restored or the [`CancellationToken`] is triggered.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Call `connect` until it succeeds, sleeping with exponential backoff
/// between failures.
///
/// The first attempt is immediate. Returns `None` if `cancel` fires first.
pub async fn reconnect_loop<T, E, F, Fut>(
    mut connect: F,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Broker connect cancelled");
                return None;
            }
            result = connect() => {
                match result {
                    Ok(conn) => {
                        if attempt > 1 {
                            tracing::info!(attempt, "Reconnected to broker");
                        }
                        return Some(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            "Broker connect attempt failed",
                        );
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
