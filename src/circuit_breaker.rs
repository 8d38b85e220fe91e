//! Three-state failure gate, reused per endpoint or adapter.
//!
//! Grounded on the connection-pool circuit breaker pattern (closed/open/
//! half-open behind a single lock, `AllowRequest`-style admission check that
//! both reads and transitions state); extended here with the half-open
//! probe quota spec.md requires.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain_types::{FailureThreshold, HalfOpenRequests, RecoveryTimeoutMs};

/// The three states a breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// All calls admitted; failures are counted.
    Closed,
    /// All calls rejected until the recovery timeout elapses.
    Open,
    /// A limited number of probe calls are admitted to test recovery.
    HalfOpen,
}

/// Tunables for a [`CircuitBreaker`]. Defaults match spec.md §4.2:
/// threshold 5, recovery 30s, half-open quota 3.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker from closed to open.
    #[serde(rename = "failureThreshold")]
    pub failure_threshold: FailureThreshold,
    /// Time the breaker stays open before allowing a probe.
    #[serde(rename = "recoveryTimeout")]
    pub recovery_timeout: RecoveryTimeoutMs,
    /// Consecutive half-open successes required to close the breaker.
    #[serde(rename = "halfOpenRequests")]
    pub half_open_requests: HalfOpenRequests,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: FailureThreshold::default(),
            recovery_timeout: RecoveryTimeoutMs::default(),
            half_open_requests: HalfOpenRequests::default(),
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
}

/// A single failure gate. Every read and state-affecting call is serialized
/// under one lock, so `allow_request` can atomically read-and-transition.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a new breaker, starting `closed`, with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_success_time: None,
            }),
        }
    }

    /// Checks (and possibly transitions) whether a call may proceed right now.
    ///
    /// `open -> half_open` happens here, the moment the recovery timeout has
    /// elapsed since the last failure; counters reset on that transition.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed_enough = inner
                    .last_failure_time
                    .is_some_and(|t| t.elapsed() >= self.config.recovery_timeout.as_duration());
                if elapsed_enough {
                    inner.state = CircuitState::HalfOpen;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call.
    ///
    /// In `half_open`, counts toward the quota needed to close; reaching it
    /// resets the failure count and transitions to `closed`. In `closed`,
    /// just refreshes the last-success timestamp.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.last_success_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_requests.as_u32() {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    ///
    /// Any failure while `half_open` immediately returns to `open`. While
    /// `closed`, reaching the failure threshold trips the breaker open.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_time = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold.as_u32() {
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the breaker closed with zero counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    /// Administrative override: forces the breaker open.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Open;
        inner.last_failure_time = Some(Instant::now());
    }

    /// Administrative override: forces the breaker closed with zero counters.
    pub fn force_close(&self) {
        self.reset();
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Returns `(failure_count, success_count)` for diagnostics and tests.
    pub fn counters(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.failure_count, inner.success_count)
    }
}
