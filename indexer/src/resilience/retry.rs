use rand::Rng;
use std::time::Duration;

/// Exponential backoff settings for a [`super::ResilientExecutor`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            backoff_multiplier: 1.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following failed attempt `attempt`
    /// (0-based). Always bounded by `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt.min(63) as i32);
        let mut delay = self.base_delay.as_secs_f64() * exp * self.backoff_multiplier;

        // +/- 50% jitter, applied before the cap so the bound holds
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.0);
            delay *= factor;
        }

        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}
