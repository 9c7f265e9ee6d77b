//! Process-local circuit breaker for the identity provider.
//!
//! A single failure timestamp gates every remote introspection call. While
//! the breaker is open the pipeline skips introspection and falls through to
//! the remaining stages; it never turns the skip into an error.

use crate::observability::metrics;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;

pub struct CircuitBreaker {
    cooldown: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_failure: RwLock::new(None),
        }
    }

    /// True unless a failure was recorded less than `cooldown` ago.
    pub fn allow(&self) -> bool {
        match *self.last_failure.read() {
            Some(at) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Record a failure now, opening the breaker for one cooldown.
    pub fn trip(&self) {
        *self.last_failure.write() = Some(Instant::now());
        metrics::record_circuit_trip();
        tracing::warn!(
            target: "auth.circuit_breaker",
            cooldown_secs = self.cooldown.as_secs(),
            "Identity provider circuit breaker tripped"
        );
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("cooldown", &self.cooldown)
            .field("open", &!self.allow())
            .finish()
    }
}
