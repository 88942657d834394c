use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
    /// Trial calls allowed in flight while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every entry into half-open so late permits cannot free a
    /// slot reserved in a later trial window.
    trial_generation: u64,
    opened_at: Option<Instant>,
}

/// Admission for one guarded call.
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure). A permit dropped without an outcome (the call's
/// future was cancelled) hands its half-open trial slot back.
#[must_use = "a permit should record the outcome of the call it admitted"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl CallPermit<'_> {
    pub fn success(self) {
        self.success_at(Instant::now());
    }

    pub fn success_at(mut self, now: Instant) {
        self.trial = None;
        self.breaker.record_success_at(now);
    }

    pub fn failure(self) {
        self.failure_at(Instant::now());
    }

    pub fn failure_at(mut self, now: Instant) {
        self.trial = None;
        self.breaker.record_failure_at(now);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.trial.take() {
            self.breaker.release_trial(generation);
        }
    }
}

/// Closed -> Open -> HalfOpen -> Closed state machine guarding one collaborator.
///
/// The `*_at` variants take an explicit instant so transitions can be driven
/// deterministically; the plain variants use `Instant::now()`.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                success_threshold: config.success_threshold.max(1),
                half_open_max_calls: config.half_open_max_calls.max(1),
                ..config
            },
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                trial_generation: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state_at(Instant::now())
    }

    pub fn state_at(&self, now: Instant) -> CircuitState {
        let mut inner = self.lock();
        self.advance(&mut inner, now);
        inner.state
    }

    pub fn acquire(&self) -> Option<CallPermit<'_>> {
        self.acquire_at(Instant::now())
    }

    /// Admits a call if the circuit allows one right now. In half-open the
    /// permit holds one of the limited trial slots.
    pub fn acquire_at(&self, now: Instant) -> Option<CallPermit<'_>> {
        let mut inner = self.lock();
        self.advance(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Some(CallPermit { breaker: self, trial: None }),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_calls {
                    return None;
                }
                inner.half_open_in_flight += 1;
                Some(CallPermit { breaker: self, trial: Some(inner.trial_generation) })
            }
        }
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_generation == generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    pub fn record_success_at(&self, now: Instant) {
        let mut inner = self.lock();
        self.advance(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 0;
                    inner.opened_at = None;
                    info!(
                        event_name = "resilience.breaker.closed",
                        collaborator = %self.name,
                        "circuit closed after successful trial calls"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        self.advance(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => self.open(&mut inner, now),
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
        warn!(
            event_name = "resilience.breaker.opened",
            collaborator = %self.name,
            consecutive_failures = inner.consecutive_failures,
            recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
            "circuit opened"
        );
    }

    fn advance(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|opened_at| now.saturating_duration_since(opened_at))
            .unwrap_or_default();
        if elapsed >= self.config.recovery_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.consecutive_successes = 0;
            inner.half_open_in_flight = 0;
            inner.trial_generation += 1;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
