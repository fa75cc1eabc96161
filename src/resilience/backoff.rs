//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay before retrying after `attempt` (1-based) failed, without jitter.
///
/// `min(initial_delay * multiplier^(attempt - 1), max_delay)`
pub fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let initial = config.initial_delay().as_secs_f64();
    let max = config.max_delay().as_secs_f64();
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let exponential = initial * config.multiplier.powi(exponent);

    // powi overflows to inf for large attempts; min() still caps it.
    let capped = if exponential.is_finite() { exponential.min(max) } else { max };
    Duration::from_secs_f64(capped.max(0.0))
}

/// Calculate exponential backoff delay with jitter.
///
/// The capped delay `d` is shifted by a uniform offset in
/// `[-jitter * d, +jitter * d]`; a negative result falls back to the initial delay.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let delay = base_delay(attempt, config);
    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }

    let spread = delay.as_secs_f64() * jitter;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let jittered = delay.as_secs_f64() + offset;
    if jittered < 0.0 {
        return config.initial_delay();
    }
    Duration::from_secs_f64(jittered)
}
