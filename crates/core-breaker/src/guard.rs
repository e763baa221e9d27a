//! Circuit breaker state machine
//!
//! A [`Guard`] protects one named dependency. It has three states:
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls fail immediately until the cooldown elapses
//! - HalfOpen: a limited number of trial calls test whether the dependency recovered
//!
//! ```text
//! Closed ──(failures >= threshold)──▶ Open
//! Open ──(call after cooldown)──▶ HalfOpen
//! HalfOpen ──(max_calls successes)──▶ Closed
//! HalfOpen ──(any failure)──▶ Open
//! any ──(reset)──▶ Closed
//! ```
//!
//! The guard does no locking of its own. Share it across threads through
//! [`SharedGuard`](crate::SharedGuard), or across processes through
//! [`CoordinatedGuard`](crate::CoordinatedGuard).

use crate::clock::{add_duration, Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::{GuardError, Rejection};
use crate::snapshot::StateSnapshot;
use crate::state::CircuitState;
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Circuit breaker for one protected dependency
///
/// # Example
/// ```
/// use tripwire_core_breaker::{Guard, GuardConfig, CircuitState};
///
/// let mut guard = Guard::new("inventory-db", GuardConfig::default().with_failure_threshold(2));
///
/// let value = guard.call(|| Ok::<_, String>(42)).unwrap();
/// assert_eq!(value, 42);
///
/// for _ in 0..2 {
///     let _ = guard.call(|| Err::<(), _>("connection refused".to_string()));
/// }
/// assert_eq!(guard.state(), CircuitState::Open);
///
/// // Rejected without running the closure
/// let err = guard.call(|| Ok::<_, String>(1)).unwrap_err();
/// assert!(err.is_rejected());
/// ```
#[derive(Debug, Clone)]
pub struct Guard {
    name: String,
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    state: CircuitState,
    failure_count: u32,
    half_open_call_count: u32,
    half_open_success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
}

impl Guard {
    /// Create a closed guard using the system clock
    pub fn new(name: impl Into<String>, config: GuardConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a closed guard with an explicit clock
    pub fn with_clock(name: impl Into<String>, config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_call_count: 0,
            half_open_success_count: 0,
            last_failure_time: None,
            next_attempt_time: None,
        }
    }

    /// Rehydrate a guard; `None` yields a fresh, never-failed guard
    pub fn from_snapshot(
        name: impl Into<String>,
        config: GuardConfig,
        clock: Arc<dyn Clock>,
        snapshot: Option<&StateSnapshot>,
    ) -> Self {
        let mut guard = Self::with_clock(name, config, clock);
        if let Some(snapshot) = snapshot {
            guard.restore(snapshot);
        }
        guard
    }

    /// Name of the protected dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds this guard was built with
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Current state, without evaluating the cooldown
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures since the last success or reset
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Trial calls admitted since entering half-open
    pub fn half_open_call_count(&self) -> u32 {
        self.half_open_call_count
    }

    /// Trial successes since entering half-open
    pub fn half_open_success_count(&self) -> u32 {
        self.half_open_success_count
    }

    /// When the most recent failure was recorded
    pub fn last_failure_time(&self) -> Option<DateTime<Utc>> {
        self.last_failure_time
    }

    /// When an open circuit will admit its first trial call
    pub fn next_attempt_time(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_time
    }

    /// Whether a call made now would be admitted. Does not change state.
    pub fn allows_calls(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                self.cooldown_elapsed() && self.config.half_open_max_calls > 0
            }
            CircuitState::HalfOpen => self.half_open_call_count < self.config.half_open_max_calls,
        }
    }

    /// Admission half of [`call`](Self::call)
    ///
    /// Moves an open circuit whose cooldown has elapsed to half-open, then
    /// takes one trial slot if half-open. On `Ok` the caller must report the
    /// outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&mut self) -> Result<(), Rejection> {
        if self.state == CircuitState::Open {
            if !self.cooldown_elapsed() {
                debug!(guard = %self.name, "circuit open, rejecting call");
                return Err(self.rejection());
            }
            self.transition_to_half_open();
        }

        if self.state == CircuitState::HalfOpen {
            if self.half_open_call_count >= self.config.half_open_max_calls {
                debug!(
                    guard = %self.name,
                    admitted = self.half_open_call_count,
                    "trial quota exhausted, rejecting call"
                );
                return Err(self.rejection());
            }
            self.half_open_call_count += 1;
        }

        Ok(())
    }

    /// Run `op` under circuit protection
    ///
    /// Produces exactly one of: the operation's value, a rejection (the
    /// operation is not invoked), or the operation's own error unchanged.
    /// Every error from `op` counts as a failure. A panic in `op` is recorded
    /// as a failure and then resumed.
    pub fn call<T, E, F>(&mut self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.try_acquire()?;

        match panic::catch_unwind(AssertUnwindSafe(op)) {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(GuardError::Failed(e))
            }
            Err(payload) => {
                warn!(guard = %self.name, "guarded operation panicked");
                self.record_failure();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.last_failure_time = None;

        match self.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                if self.half_open_success_count.saturating_add(1) >= self.config.half_open_max_calls {
                    self.transition_to_closed();
                } else {
                    self.half_open_success_count += 1;
                }
            }
            CircuitState::Open => {
                // Reported outside the call path
                self.transition_to_closed();
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&mut self) {
        let now = self.clock.now();
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(now);

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.transition_to_open(now);
                }
            }
            CircuitState::HalfOpen => {
                // A single failed trial call reopens; prior trial successes are discarded
                self.failure_count = 1;
                self.transition_to_open(now);
            }
            CircuitState::Open => {
                // Cooldown is not extended by failures reported while open
            }
        }
    }

    /// Force the circuit closed and clear all counters and timestamps
    pub fn reset(&mut self) {
        if self.state != CircuitState::Closed || self.failure_count > 0 {
            info!(guard = %self.name, from = %self.state, "circuit reset");
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_call_count = 0;
        self.half_open_success_count = 0;
        self.last_failure_time = None;
        self.next_attempt_time = None;
    }

    /// Capture the mutable state, stamped with the current time
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            half_open_call_count: self.half_open_call_count,
            half_open_success_count: self.half_open_success_count,
            last_failure_time: self.last_failure_time,
            next_attempt_time: self.next_attempt_time,
            last_updated: self.clock.now(),
        }
    }

    /// Replace the mutable state with a snapshot's
    pub fn restore(&mut self, snapshot: &StateSnapshot) {
        self.state = snapshot.state;
        self.failure_count = snapshot.failure_count;
        self.half_open_call_count = snapshot.half_open_call_count;
        self.half_open_success_count = snapshot.half_open_success_count;
        self.last_failure_time = snapshot.last_failure_time;
        self.next_attempt_time = snapshot.next_attempt_time;
    }

    /// Name of the first violated state invariant, if any
    pub fn invariant_violation(&self) -> Option<&'static str> {
        let half_open = self.state == CircuitState::HalfOpen;
        if !half_open && (self.half_open_call_count > 0 || self.half_open_success_count > 0) {
            return Some("half-open counters set outside half-open");
        }
        if self.state != CircuitState::Open && self.next_attempt_time.is_some() {
            return Some("next attempt time set outside open");
        }
        if self.state == CircuitState::Open && self.next_attempt_time.is_none() {
            return Some("open without a next attempt time");
        }
        if self.state == CircuitState::Closed
            && self.failure_count > 0
            && self.failure_count >= self.config.failure_threshold
        {
            return Some("closed with failures at threshold");
        }
        if self.failure_count == 0 && self.last_failure_time.is_some() && !half_open {
            return Some("last failure time set without failures");
        }
        None
    }

    fn cooldown_elapsed(&self) -> bool {
        self.next_attempt_time
            .map_or(true, |next| self.clock.now() >= next)
    }

    fn rejection(&self) -> Rejection {
        Rejection {
            name: self.name.clone(),
            state: self.state,
        }
    }

    fn transition_to_open(&mut self, now: DateTime<Utc>) {
        let next = add_duration(now, self.config.recovery_timeout);
        warn!(
            guard = %self.name,
            failures = self.failure_count,
            next_attempt = %next,
            "circuit opened"
        );
        self.state = CircuitState::Open;
        self.next_attempt_time = Some(next);
        self.half_open_call_count = 0;
        self.half_open_success_count = 0;
    }

    fn transition_to_half_open(&mut self) {
        debug!(guard = %self.name, "cooldown elapsed, circuit half-open");
        self.state = CircuitState::HalfOpen;
        self.failure_count = 0;
        self.half_open_call_count = 0;
        self.half_open_success_count = 0;
        self.next_attempt_time = None;
    }

    fn transition_to_closed(&mut self) {
        info!(guard = %self.name, from = %self.state, "circuit closed");
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_call_count = 0;
        self.half_open_success_count = 0;
        self.last_failure_time = None;
        self.next_attempt_time = None;
    }
}
