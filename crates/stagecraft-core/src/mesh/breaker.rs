//! Per-capability circuit breaker.
//!
//! Tracks consecutive failures of routed calls for one capability and stops
//! routing once a threshold is reached. After a cooldown the breaker allows
//! exactly one trial call: success closes the circuit, failure reopens it
//! and restarts the cooldown.

use std::time::{Duration, Instant};

use stagecraft_types::config::CircuitBreakerConfig;

/// Circuit breaker state for one capability.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Routing is stopped. A trial is allowed once `cooldown` has elapsed.
    Open { opened_at: Instant },
    /// One trial call is in flight; further requests wait for its verdict.
    HalfOpen,
}

/// Failure tracking for a single capability.
#[derive(Debug)]
pub struct CapabilityBreaker {
    /// Capability name (matches the registry's capability strings).
    capability: String,
    state: CircuitState,
    failure_threshold: u32,
    cooldown: Duration,
    /// Last error message observed for this capability.
    last_error: Option<String>,
    total_calls: u64,
    total_failures: u64,
}

impl CapabilityBreaker {
    /// Create a closed breaker for a capability.
    pub fn new(capability: &str, config: &CircuitBreakerConfig) -> Self {
        Self {
            capability: capability.to_string(),
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            failure_threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
            last_error: None,
            total_calls: 0,
            total_failures: 0,
        }
    }

    /// The capability this breaker guards.
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// Current circuit state.
    pub fn state(&self) -> &CircuitState {
        &self.state
    }

    /// Whether a routed call may proceed right now.
    ///
    /// Handles the Open -> HalfOpen transition: the first caller after the
    /// cooldown gets the single trial slot; everyone else is refused until
    /// the trial's outcome is recorded.
    pub fn allow_request(&mut self) -> bool {
        match &self.state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.cooldown {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => false,
        }
    }

    /// Record a successful routed call.
    pub fn record_success(&mut self) {
        self.total_calls += 1;
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed routed call.
    ///
    /// Opens the circuit at `failure_threshold` consecutive failures, and
    /// immediately on a failed half-open trial.
    pub fn record_failure(&mut self, error: &str) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.last_error = Some(error.to_string());

        match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let count = consecutive_failures + 1;
                if count >= self.failure_threshold {
                    tracing::warn!(
                        capability = self.capability.as_str(),
                        failures = count,
                        "circuit opened"
                    );
                    self.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: count,
                    };
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    capability = self.capability.as_str(),
                    "trial call failed, circuit reopened"
                );
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Last error recorded for this capability.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Total routed calls seen by this breaker.
    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    /// Total failed routed calls.
    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }
}
