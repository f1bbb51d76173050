//! Retry, circuit breaker and bulkhead primitives wrapping every call
//! to the node CLI and the database.
//!
//! The three patterns compose as retry(circuit(bulkhead(op))): the
//! bulkhead bounds in-flight work, the breaker fails fast while the
//! upstream is unhealthy, and the retry loop spaces new attempts with
//! exponential backoff and jitter.

mod bulkhead;
mod circuit;
mod retry;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use retry::RetryConfig;

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Errors that may succeed on a later attempt. Parse failures and
/// constraint violations are not transient; process spawn failures,
/// timeouts and connection drops are.
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

#[derive(Debug)]
pub enum ResilienceError<E: std::error::Error + 'static> {
    RetryExhausted {
        name: &'static str,
        attempts: u32,
        last: Box<ResilienceError<E>>,
    },

    CircuitOpen {
        name: &'static str,
        remaining_millis: u64,
    },

    BulkheadFull {
        name: &'static str,
        active: usize,
        queued: usize,
    },

    Inner(E),
}

// Written by hand rather than derived: `#[derive(Error)]` on this
// self-referential generic (`RetryExhausted.last: Box<ResilienceError<E>>`)
// makes the derive macro emit a `Box<ResilienceError<E>>: StdError` bound
// that expands without bound during trait resolution (E0275 overflow).
// These impls produce the exact same Display/source behavior the derive
// would have, without tripping that expansion.
impl<E: std::error::Error + 'static> std::fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResilienceError::RetryExhausted { name, attempts, .. } => {
                write!(f, "'{}' gave up after {} attempts", name, attempts)
            }
            ResilienceError::CircuitOpen {
                name,
                remaining_millis,
            } => write!(
                f,
                "circuit breaker '{}' is open, next attempt in {} ms",
                name, remaining_millis
            ),
            ResilienceError::BulkheadFull {
                name,
                active,
                queued,
            } => write!(
                f,
                "bulkhead '{}' is full: {} active, {} queued",
                name, active, queued
            ),
            ResilienceError::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResilienceError::RetryExhausted { last, .. } => Some(last.as_ref()),
            ResilienceError::CircuitOpen { .. } => None,
            ResilienceError::BulkheadFull { .. } => None,
            ResilienceError::Inner(e) => Some(e),
        }
    }
}

impl<E: std::error::Error + TransientError> TransientError for ResilienceError<E> {
    fn is_transient(&self) -> bool {
        match self {
            // all attempts are already spent
            ResilienceError::RetryExhausted { .. } => false,
            ResilienceError::CircuitOpen { .. } => true,
            ResilienceError::BulkheadFull { .. } => true,
            ResilienceError::Inner(e) => e.is_transient(),
        }
    }
}

/// Observable snapshot of one executor, served on the monitoring
/// surface.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub name: &'static str,
    pub max_attempts: u32,
    pub circuit: Option<CircuitStats>,
    pub bulkhead: Option<BulkheadStats>,
}

/// Combines retry, circuit breaker and bulkhead around an async call.
pub struct ResilientExecutor {
    name: &'static str,
    retry: RetryConfig,
    circuit: Option<CircuitBreaker>,
    bulkhead: Option<Bulkhead>,
}

impl ResilientExecutor {
    pub fn new(
        name: &'static str,
        retry: RetryConfig,
        circuit: Option<CircuitBreakerConfig>,
        bulkhead: Option<BulkheadConfig>,
    ) -> Self {
        Self {
            name,
            retry,
            circuit: circuit.map(|config| CircuitBreaker::new(name, config)),
            bulkhead: bulkhead.map(Bulkhead::new),
        }
    }

    /// Executor wrapping node CLI calls: transient subprocess failures
    /// are retried quickly, cascading timeouts trip the breaker fast,
    /// and concurrent spawns are capped.
    pub fn node_operations() -> Self {
        Self::new(
            "node_operations",
            RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(10),
                exponential_base: 2.0,
                backoff_multiplier: 1.0,
                jitter: true,
            },
            Some(CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(30),
                success_threshold: 2,
            }),
            Some(BulkheadConfig {
                max_concurrent: 10,
                queue_size: 50,
                timeout: Duration::from_secs(30),
            }),
        )
    }

    /// Executor wrapping database work: more attempts with shorter
    /// delays, tuned for deadlocks and serialization conflicts.
    pub fn database_operations() -> Self {
        Self::new(
            "database_operations",
            RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                exponential_base: 1.5,
                backoff_multiplier: 1.0,
                jitter: true,
            },
            Some(CircuitBreakerConfig {
                failure_threshold: 10,
                recovery_timeout: Duration::from_secs(15),
                success_threshold: 3,
            }),
            None,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run `op` under all configured patterns. `op` is called once per
    /// attempt; non-transient errors propagate immediately.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, ResilienceError<E>>
    where
        E: std::error::Error + TransientError + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.execute_once(&mut op).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            "'{}' succeeded after {} retried attempts",
                            self.name, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_transient() {
                        return Err(err);
                    }

                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        error!(
                            "'{}' failed after {} attempts: {}",
                            self.name, attempt, err
                        );
                        return Err(ResilienceError::RetryExhausted {
                            name: self.name,
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }

                    let delay = self.retry.delay(attempt - 1);
                    warn!(
                        "'{}' failed (attempt {}/{}): {}, retrying in {:?}",
                        self.name, attempt, self.retry.max_attempts, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn execute_once<T, E, F, Fut>(&self, op: &mut F) -> Result<T, ResilienceError<E>>
    where
        E: std::error::Error + TransientError + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(circuit) = &self.circuit {
            if let Err(remaining) = circuit.try_acquire() {
                return Err(ResilienceError::CircuitOpen {
                    name: self.name,
                    remaining_millis: remaining.as_millis() as u64,
                });
            }
        }

        let result = match &self.bulkhead {
            Some(bulkhead) => match bulkhead.run(op()).await {
                Ok(inner) => inner.map_err(ResilienceError::Inner),
                Err(rejection) => Err(ResilienceError::BulkheadFull {
                    name: self.name,
                    active: rejection.active,
                    queued: rejection.queued,
                }),
            },
            None => op().await.map_err(ResilienceError::Inner),
        };

        if let Some(circuit) = &self.circuit {
            match &result {
                Ok(_) => circuit.record_success(),
                Err(_) => circuit.record_failure(),
            }
        }

        result
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            name: self.name,
            max_attempts: self.retry.max_attempts,
            circuit: self.circuit.as_ref().map(|c| c.stats()),
            bulkhead: self.bulkhead.as_ref().map(|b| b.stats()),
        }
    }
}
