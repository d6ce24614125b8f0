//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold within window
//! Open → Half-Open: first allow() after recovery timeout
//! Half-Open → Closed: trial budget exhausted with all successes
//! Half-Open → Open: any trial fails (opened_at restarts)
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global), each behind its own mutex
//! - Fail fast in Open state (no waiting for timeout)
//! - Bounded trials in Half-Open (prevents hammering recovering backend)
//! - Counters reset on every entry into Closed, Open or Half-Open
//! - Outcomes arriving while Open belong to calls admitted earlier and are ignored
//! - Callers hold a [`BreakerPermit`] per admitted call; a permit dropped
//!   without an outcome (cancelled caller) records a failure, so a Half-Open
//!   trial slot is never lost

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_trial_budget: u32,
    pub failure_window: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            half_open_trial_budget: config.half_open_trial_budget.max(1),
            failure_window: Duration::from_secs(config.failure_window_secs),
        }
    }
}

/// Point-in-time view of a breaker, for admin and health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub backend: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Milliseconds since the circuit last opened, while Open.
    pub open_for_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    trials_admitted: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            trials_admitted: 0,
            opened_at: None,
            last_failure_at: None,
        }
    }
}

/// Circuit breaker guarding one backend identity.
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            backend: backend.into(),
            settings,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // State is plain data and every update is complete before unlock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether a call may proceed now. Admits a trial slot when Half-Open.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened))
                    .unwrap_or(Duration::MAX);
                if elapsed < self.settings.recovery_timeout {
                    return false;
                }
                self.transition(&mut inner, CircuitState::HalfOpen, now);
                inner.trials_admitted = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trials_admitted < self.settings.half_open_trial_budget {
                    inner.trials_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Admit one call, returning a permit that must be settled with its outcome.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Option<BreakerPermit> {
        self.allow_at(now).then(|| BreakerPermit {
            breaker: Arc::clone(self),
            settled: false,
        })
    }

    pub fn record_success(&self) {
        self.record_success_at(Instant::now())
    }

    pub fn record_success_at(&self, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = inner.success_count.saturating_add(1);
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                tracing::debug!(
                    backend = %self.backend,
                    successes = inner.success_count,
                    budget = self.settings.half_open_trial_budget,
                    "Half-open trial succeeded"
                );
                if inner.success_count >= self.settings.half_open_trial_budget {
                    self.transition(&mut inner, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {
                tracing::debug!(backend = %self.backend, "Ignoring late success while open");
            }
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                let stale = inner
                    .last_failure_at
                    .map(|last| now.saturating_duration_since(last) > self.settings.failure_window)
                    .unwrap_or(false);
                if stale {
                    inner.failure_count = 0;
                }
                inner.failure_count += 1;
                inner.last_failure_at = Some(now);
                tracing::debug!(
                    backend = %self.backend,
                    failures = inner.failure_count,
                    threshold = self.settings.failure_threshold,
                    "Backend failure recorded"
                );
                if inner.failure_count >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {
                tracing::debug!(backend = %self.backend, "Ignoring late failure while open");
            }
        }
    }

    /// Force the breaker back to Closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let from = inner.state;
        *inner = BreakerState::closed();
        metrics::record_breaker_state(&self.backend, CircuitState::Closed);
        tracing::info!(backend = %self.backend, from = %from, "Circuit breaker manually reset");
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            backend: self.backend.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            open_for_ms: match inner.state {
                CircuitState::Open => inner
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened).as_millis() as u64),
                _ => None,
            },
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        inner.state = to;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.trials_admitted = 0;
        inner.last_failure_at = None;
        inner.opened_at = match to {
            CircuitState::Open => Some(now),
            _ => None,
        };

        match to {
            CircuitState::Open => tracing::warn!(
                backend = %self.backend,
                from = %from,
                to = %to,
                recovery_timeout = ?self.settings.recovery_timeout,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                backend = %self.backend,
                from = %from,
                to = %to,
                "Circuit breaker state change"
            ),
        }
        metrics::record_breaker_transition(&self.backend, to);
    }
}

/// One call admitted by [`CircuitBreaker::try_acquire`].
///
/// Reports exactly one outcome: `success`, `failure`, or a failure on drop.
#[must_use = "an unsettled permit records a failure when dropped"]
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    settled: bool,
}

impl BreakerPermit {
    pub fn backend(&self) -> &str {
        self.breaker.backend()
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(backend = %self.breaker.backend, "Call abandoned before an outcome");
            self.breaker.record_failure();
        }
    }
}
