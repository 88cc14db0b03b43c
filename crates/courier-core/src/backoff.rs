//! Reconnect backoff schedule.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive attempts
    pub multiplier: f64,
    /// Spread delays by a random factor in `[0.75, 1.25]`
    pub jitter: bool,
    /// Give up after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectConfig {
    /// Sets the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Disables jitter (deterministic delays).
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
            max_attempts: None,
        }
    }
}

/// Exponential backoff over consecutive reconnect attempts.
///
/// The first attempt after a healthy connection runs immediately; attempt `n`
/// (n >= 2) waits `min(initial * multiplier^(n-2), max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempts: u32,
}

impl Backoff {
    /// Create a fresh schedule.
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Attempts taken since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over; call once a connection is established.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Un-jittered delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(2).min(32) as i32;
        let scaled =
            self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let capped = scaled.min(self.config.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Register a new attempt and return how long to wait before it.
    ///
    /// Returns `None` once `max_attempts` is exhausted.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if let Some(max) = self.config.max_attempts
            && self.attempts >= max
        {
            return None;
        }

        self.attempts += 1;
        let base = self.delay_for_attempt(self.attempts);

        if !self.config.jitter || base.is_zero() {
            return Some(base);
        }

        let factor = rng.gen_range(0.75..=1.25);
        Some(base.mul_f64(factor).min(self.config.max_delay))
    }
}
