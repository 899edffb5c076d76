//! Per-(worker-kind, service) circuit breakers (§4.5, §3 `CircuitBreakerState`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::BreakerConfig;
use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    half_open_probes_in_flight: u32,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_until: None,
            half_open_probes_in_flight: 0,
        }
    }
}

/// Tracks one breaker per service key, transitioning closed -> open ->
/// half-open -> closed per §4.5's parameters.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Call before dispatching to `service`. Returns `CircuitOpen` if the
    /// breaker has not yet reached its reset timeout, or if a half-open
    /// probe is already in flight (only one probe is permitted at a time).
    pub async fn check(&self, service: &str) -> Result<(), GuardError> {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(service.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                if breaker.half_open_probes_in_flight >= self.config.half_open_probes {
                    Err(GuardError::CircuitOpen {
                        service: service.to_string(),
                        retry_after: Duration::from_secs(0),
                    })
                } else {
                    breaker.half_open_probes_in_flight += 1;
                    Ok(())
                }
            }
            BreakerState::Open => {
                let now = Instant::now();
                if breaker.open_until.is_some_and(|t| now >= t) {
                    breaker.state = BreakerState::HalfOpen;
                    breaker.half_open_probes_in_flight = 1;
                    Ok(())
                } else {
                    let retry_after = breaker
                        .open_until
                        .map(|t| t.saturating_duration_since(now))
                        .unwrap_or_default();
                    Err(GuardError::CircuitOpen {
                        service: service.to_string(),
                        retry_after,
                    })
                }
            }
        }
    }

    /// Record a successful call: closes the breaker and resets counters.
    pub async fn record_success(&self, service: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(service.to_string()).or_insert_with(Breaker::new);
        breaker.state = BreakerState::Closed;
        breaker.consecutive_failures = 0;
        breaker.open_until = None;
        breaker.half_open_probes_in_flight = 0;
    }

    /// Record a failed call: a half-open probe failing re-opens
    /// immediately; a closed breaker opens once `failure_threshold`
    /// consecutive failures accumulate.
    pub async fn record_failure(&self, service: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(service.to_string()).or_insert_with(Breaker::new);
        breaker.half_open_probes_in_flight = 0;

        if breaker.state == BreakerState::HalfOpen {
            breaker.state = BreakerState::Open;
            breaker.open_until = Some(Instant::now() + self.config.open_duration);
            return;
        }

        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= self.config.failure_threshold {
            breaker.state = BreakerState::Open;
            breaker.open_until = Some(Instant::now() + self.config.open_duration);
        }
    }

    pub async fn state_of(&self, service: &str) -> BreakerState {
        self.breakers
            .read()
            .await
            .get(service)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            open_duration: Duration::from_millis(50),
            half_open_probes: 1,
        }
    }

    #[tokio::test]
    async fn opens_after_consecutive_failure_threshold() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..3 {
            registry.record_failure("serverless-pdf").await;
        }
        assert_eq!(registry.state_of("serverless-pdf").await, BreakerState::Open);
        assert!(registry.check("serverless-pdf").await.is_err());
    }

    #[tokio::test]
    async fn half_opens_after_reset_timeout_and_closes_on_success() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..3 {
            registry.record_failure("serverless-pdf").await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(registry.check("serverless-pdf").await.is_ok());
        assert_eq!(registry.state_of("serverless-pdf").await, BreakerState::HalfOpen);

        registry.record_success("serverless-pdf").await;
        assert_eq!(registry.state_of("serverless-pdf").await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens_immediately() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..3 {
            registry.record_failure("serverless-pdf").await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        registry.check("serverless-pdf").await.unwrap();
        registry.record_failure("serverless-pdf").await;
        assert_eq!(registry.state_of("serverless-pdf").await, BreakerState::Open);
    }

    #[tokio::test]
    async fn services_are_independent() {
        let registry = CircuitBreakerRegistry::new(test_config());
        for _ in 0..3 {
            registry.record_failure("serverless-pdf").await;
        }
        assert_eq!(registry.state_of("multi-server").await, BreakerState::Closed);
        assert!(registry.check("multi-server").await.is_ok());
    }
}
