use crate::core::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Trait for defining reconnection strategies
///
/// Implement this trait to control how a persistent channel should
/// behave when reconnecting after a disconnection.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next reconnection attempt
    ///
    /// # Arguments
    /// * `attempt` - The reconnection attempt number (0-indexed)
    ///
    /// # Returns
    /// * `Some(duration)` - Wait this long before reconnecting
    /// * `None` - Stop reconnecting
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Check if we should continue reconnecting
    fn should_reconnect(&self, attempt: u32) -> bool;
}

/// Exponential backoff with jitter
///
/// Delays grow as `base_delay * 2^attempt`, capped at `max_delay`, then
/// perturbed by a uniformly sampled factor in `1 ± jitter_ratio` so many
/// channels losing the same upstream do not reconnect in lockstep.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    /// # Arguments
    /// * `base_delay` - Delay before the first retry
    /// * `max_delay` - Cap on the un-jittered delay
    /// * `jitter_ratio` - Perturbation fraction in `[0, 1]`
    /// * `max_attempts` - Maximum number of attempts (None = unlimited)
    pub fn new(
        base_delay: Duration,
        max_delay: Duration,
        jitter_ratio: f64,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
            max_attempts,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.base_delay,
            config.max_delay,
            config.jitter_ratio,
            config.max_attempts,
        )
    }

    /// Delay before jitter is applied; exposed so tests can pin the
    /// envelope without depending on the sampled perturbation.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled = 1u64
            .checked_shl(attempt)
            .map_or(u64::MAX, |factor| base_ms.saturating_mul(factor));
        Duration::from_millis(scaled.min(self.max_delay.as_millis() as u64))
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }

        let delay = self.raw_delay(attempt);
        if self.jitter_ratio == 0.0 {
            return Some(delay);
        }

        let factor = rand::thread_rng()
            .gen_range((1.0 - self.jitter_ratio)..=(1.0 + self.jitter_ratio));
        Some(delay.mul_f64(factor))
    }

    fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Fixed delay reconnection strategy
///
/// Always waits the same amount of time between reconnection attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }
        Some(self.delay)
    }

    fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Never reconnect strategy
///
/// The channel will not attempt to reconnect after disconnection
#[derive(Debug, Clone)]
pub struct NeverReconnect;

impl ReconnectionStrategy for NeverReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn should_reconnect(&self, _attempt: u32) -> bool {
        false
    }
}
