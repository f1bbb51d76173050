use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use strum::Display;

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed that trip the breaker.
    pub failure_threshold: u32,
    /// Wall-clock to wait while open before probing again.
    pub recovery_timeout: Duration,
    /// Consecutive successes while half-open that close the breaker.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Observable snapshot, served on the monitoring surface.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Gate a call. While open and before the recovery deadline this
    /// fails fast with the remaining wait; once the deadline passed the
    /// breaker moves to half-open and the call goes through as a probe.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .opened_at
            .map(|at| at.elapsed())
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
            info!("Circuit breaker '{}' set to half-open", self.name);
            Ok(())
        } else {
            Err(self.config.recovery_timeout - elapsed)
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.success_count = 0;
                inner.opened_at = None;
                info!("Circuit breaker '{}' reset to closed", self.name);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.failure_count += 1;

        match inner.state {
            // any failure while probing re-opens immediately
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker '{}' re-opened from half-open", self.name);
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(
                    "Circuit breaker '{}' opened after {} consecutive failures",
                    self.name, inner.failure_count
                );
            }
            _ => {}
        }
    }

    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock().expect("circuit breaker lock poisoned");
        CircuitStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout: recovery,
                success_threshold: 2,
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(Duration::from_secs(60));
        for _ in 0..2 {
            cb.record_failure();
            assert!(cb.try_acquire().is_ok());
        }
        cb.record_failure();
        assert_eq!(cb.stats().state, CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // never reached 3 consecutive failures
        assert_eq!(cb.stats().state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let cb = breaker(Duration::ZERO);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.stats().state, CircuitState::Open);

        // recovery timeout of zero: next acquire probes immediately
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.stats().state, CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.stats().state, CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.stats().state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let cb = breaker(Duration::ZERO);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.stats().state, CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.stats().state, CircuitState::Open);
    }
}
