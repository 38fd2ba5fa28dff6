use std::{any::Any, future::Future};

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

/// Runs `operation` until it succeeds or `config.max_attempts` is reached.
/// Delays grow by `backoff_multiplier`, capped at `max_delay_ms`, with ±10% jitter.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, max_attempts = config.max_attempts, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= config.max_attempts {
            warn!(
                attempts = attempt,
                error = %error,
                "Giving up after exhausting retry attempts"
            );
            return Err(error);
        }

        debug!(
            attempt,
            max_attempts = config.max_attempts,
            delay_ms,
            error = %error,
            "Attempt failed, backing off"
        );

        sleep(jittered(delay_ms)).await;
        delay_ms = delay_ms
            .saturating_mul(config.backoff_multiplier)
            .min(config.max_delay_ms);
    }
}

fn jittered(delay_ms: u64) -> Duration {
    let factor = 1.0 + rand::random_range(-0.1..=0.1);
    Duration::from_millis((delay_ms as f64 * factor) as u64)
}

/// Text carried by a caught panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Percentage of `part` in `total`, rounded to two decimals. Zero when `total` is zero.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
