//! Guard whose state lives in a shared coordinator
//!
//! Each worker owns a [`CoordinatedGuard`] for a name; all of them read and
//! write the same snapshot through one [`StateCoordinator`]. Mutations run
//! under the coordinator's per-name lock and are therefore linearized across
//! workers. Accessors read without the lock and may be stale relative to an
//! in-flight mutation.
//!
//! A protected call takes the lock twice: once to admit the call and once to
//! record its outcome. The operation itself runs unlocked.

use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::coordinator::{CoordinatorExt, LockUpdate, StateCoordinator};
use crate::error::{CoordinationError, GuardError};
use crate::guard::Guard;
use crate::snapshot::StateSnapshot;
use crate::state::CircuitState;
use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Circuit breaker backed by a shared coordinator
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tripwire_core_breaker::{CircuitState, CoordinatedGuard, GuardConfig, MemoryCoordinator};
///
/// let coordinator = Arc::new(MemoryCoordinator::new());
/// let config = GuardConfig::default().with_failure_threshold(1);
/// let worker_a = CoordinatedGuard::new("billing", config.clone(), coordinator.clone());
/// let worker_b = CoordinatedGuard::new("billing", config, coordinator);
///
/// let _ = worker_a.call(|| Err::<(), _>("timeout"));
/// assert_eq!(worker_b.state().unwrap(), CircuitState::Open);
/// ```
#[derive(Debug)]
pub struct CoordinatedGuard {
    name: String,
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    coordinator: Arc<dyn StateCoordinator>,
    local: Mutex<Guard>,
}

impl CoordinatedGuard {
    /// Guard on the system clock
    pub fn new(
        name: impl Into<String>,
        config: GuardConfig,
        coordinator: Arc<dyn StateCoordinator>,
    ) -> Self {
        Self::with_clock(name, config, coordinator, Arc::new(SystemClock))
    }

    /// Guard whose timestamps come from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: GuardConfig,
        coordinator: Arc<dyn StateCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        let local = Guard::with_clock(name.clone(), config.clone(), Arc::clone(&clock));
        Self {
            name,
            config,
            clock,
            coordinator,
            local: Mutex::new(local),
        }
    }

    /// Name of the protected dependency, also the coordinator key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Thresholds this worker applies to the shared state
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Store shared with the other workers
    pub fn coordinator(&self) -> &Arc<dyn StateCoordinator> {
        &self.coordinator
    }

    /// Stored circuit state
    pub fn state(&self) -> Result<CircuitState, CoordinationError> {
        self.observe(|g| g.state())
    }

    /// Consecutive failures recorded by all workers
    pub fn failure_count(&self) -> Result<u32, CoordinationError> {
        self.observe(|g| g.failure_count())
    }

    /// Trial calls admitted since the circuit went half-open
    pub fn half_open_call_count(&self) -> Result<u32, CoordinationError> {
        self.observe(|g| g.half_open_call_count())
    }

    /// Trial successes since the circuit went half-open
    pub fn half_open_success_count(&self) -> Result<u32, CoordinationError> {
        self.observe(|g| g.half_open_success_count())
    }

    /// When any worker last recorded a failure
    pub fn last_failure_time(&self) -> Result<Option<DateTime<Utc>>, CoordinationError> {
        self.observe(|g| g.last_failure_time())
    }

    /// When an open circuit will admit its first trial call
    pub fn next_attempt_time(&self) -> Result<Option<DateTime<Utc>>, CoordinationError> {
        self.observe(|g| g.next_attempt_time())
    }

    /// Whether a call made now would be admitted
    pub fn allows_calls(&self) -> Result<bool, CoordinationError> {
        self.observe(|g| g.allows_calls())
    }

    /// Latest stored state as seen by this worker
    pub fn snapshot(&self) -> Result<StateSnapshot, CoordinationError> {
        self.observe(|g| g.snapshot())
    }

    /// Run `op` under circuit protection
    ///
    /// Admission is persisted before `op` runs and the outcome after it
    /// returns, each under its own lock. `op` may call back into guards for
    /// the same name. Once `op` has run its result is returned even if the
    /// outcome cannot be stored; that failure is logged instead. A panic in
    /// `op` is recorded as a failure before it is resumed.
    pub fn call<T, E, F>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.mutate(Guard::try_acquire)??;

        match panic::catch_unwind(AssertUnwindSafe(op)) {
            Ok(Ok(value)) => {
                self.settle(Guard::record_success);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.settle(Guard::record_failure);
                Err(GuardError::Failed(e))
            }
            Err(payload) => {
                warn!(guard = %self.name, "guarded operation panicked");
                self.settle(Guard::record_failure);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Record a success observed outside [`call`](Self::call)
    pub fn record_success(&self) -> Result<(), CoordinationError> {
        self.mutate(Guard::record_success)
    }

    /// Record a failure observed outside [`call`](Self::call)
    pub fn record_failure(&self) -> Result<(), CoordinationError> {
        self.mutate(Guard::record_failure)
    }

    /// Force the shared state back to closed
    pub fn reset(&self) -> Result<(), CoordinationError> {
        self.mutate(Guard::reset)
    }

    /// Record the outcome of an admitted call, logging if it cannot be stored
    fn settle(&self, record: fn(&mut Guard)) {
        if let Err(e) = self.mutate(record) {
            warn!(guard = %self.name, error = %e, "call outcome could not be recorded");
        }
    }

    /// Apply `f` to a guard rehydrated under the lock, then persist its state
    fn mutate<R>(&self, f: impl FnOnce(&mut Guard) -> R) -> Result<R, CoordinationError> {
        self.coordinator.with_lock(&self.name, |current| {
            let mut working = self.rehydrate(current.as_ref());
            let result = f(&mut working);
            let snapshot = working.snapshot();
            *self.local() = working;
            LockUpdate::Persist(snapshot, result)
        })
    }

    /// Reload without the lock and answer from the refreshed private guard
    fn observe<R>(&self, f: impl FnOnce(&Guard) -> R) -> Result<R, CoordinationError> {
        let current = self.coordinator.load(&self.name)?;
        let mut local = self.local();
        match current {
            Some(snapshot) => local.restore(&snapshot),
            None => *local = self.rehydrate(None),
        }
        Ok(f(&*local))
    }

    fn rehydrate(&self, snapshot: Option<&StateSnapshot>) -> Guard {
        Guard::from_snapshot(
            self.name.clone(),
            self.config.clone(),
            Arc::clone(&self.clock),
            snapshot,
        )
    }

    fn local(&self) -> MutexGuard<'_, Guard> {
        self.local.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::coordinator::{Lease, MemoryCoordinator};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Memory coordinator whose commits fail once `fail` is set
    #[derive(Debug, Default)]
    struct FailingCommits {
        inner: MemoryCoordinator,
        fail: AtomicBool,
    }

    impl StateCoordinator for FailingCommits {
        fn load(&self, name: &str) -> Result<Option<StateSnapshot>, CoordinationError> {
            self.inner.load(name)
        }

        fn save(&self, name: &str, snapshot: &StateSnapshot) -> Result<(), CoordinationError> {
            self.inner.save(name, snapshot)
        }

        fn delete(&self, name: &str) -> Result<bool, CoordinationError> {
            self.inner.delete(name)
        }

        fn exists(&self, name: &str) -> Result<bool, CoordinationError> {
            self.inner.exists(name)
        }

        fn clear(&self) -> Result<(), CoordinationError> {
            self.inner.clear()
        }

        fn acquire(&self, name: &str) -> Result<Lease, CoordinationError> {
            self.inner.acquire(name)
        }

        fn release(&self, lease: &Lease) {
            self.inner.release(lease)
        }

        fn commit(&self, lease: &Lease, snapshot: &StateSnapshot) -> Result<(), CoordinationError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoordinationError::Backend("disk full".to_string()));
            }
            self.inner.commit(lease, snapshot)
        }
    }

    fn pair(config: GuardConfig) -> (CoordinatedGuard, CoordinatedGuard, Arc<MemoryCoordinator>, FakeClock) {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let clock = FakeClock::new();
        let a = CoordinatedGuard::with_clock(
            "shared-dep",
            config.clone(),
            coordinator.clone(),
            Arc::new(clock.clone()),
        );
        let b = CoordinatedGuard::with_clock(
            "shared-dep",
            config,
            coordinator.clone(),
            Arc::new(clock.clone()),
        );
        (a, b, coordinator, clock)
    }

    #[test]
    fn test_failures_visible_across_workers() {
        let (a, b, _, _) = pair(GuardConfig::default().with_failure_threshold(3));

        a.record_failure().unwrap();
        b.record_failure().unwrap();
        assert_eq!(a.failure_count().unwrap(), 2);

        let err = a.call(|| Err::<(), _>("refused")).unwrap_err();
        assert_eq!(err.into_failure(), Some("refused"));
        assert_eq!(b.state().unwrap(), CircuitState::Open);

        let rejected = b.call(|| Ok::<_, &str>(())).unwrap_err();
        assert!(rejected.is_rejected());
    }

    #[test]
    fn test_snapshot_persisted_after_each_mutation() {
        let (a, _, coordinator, clock) = pair(GuardConfig::default());
        a.record_failure().unwrap();

        let stored = coordinator.load("shared-dep").unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.last_failure_time, Some(clock.now()));
        assert_eq!(stored.last_updated, clock.now());
    }

    #[test]
    fn test_half_open_counters_shared() {
        let config = GuardConfig::default()
            .with_failure_threshold(1)
            .with_half_open_max_calls(2)
            .with_recovery_timeout(Duration::from_secs(10));
        let (a, b, _, clock) = pair(config);
        a.record_failure().unwrap();
        clock.advance(Duration::from_secs(10));

        a.call(|| Ok::<_, ()>(())).unwrap();
        assert_eq!(b.state().unwrap(), CircuitState::HalfOpen);
        assert_eq!(b.half_open_call_count().unwrap(), 1);
        assert_eq!(b.half_open_success_count().unwrap(), 1);

        // The second trial call, from the other worker, completes the quota
        b.call(|| Ok::<_, ()>(())).unwrap();
        assert_eq!(a.state().unwrap(), CircuitState::Closed);
    }

    #[test]
    fn test_admission_persisted_before_operation_runs() {
        let config = GuardConfig::default()
            .with_failure_threshold(1)
            .with_half_open_max_calls(1)
            .with_recovery_timeout(Duration::from_secs(10));
        let (a, _, coordinator, clock) = pair(config);
        a.record_failure().unwrap();
        clock.advance(Duration::from_secs(10));

        // The half-open transition and the taken slot are stored before the operation
        let seen = a
            .call(|| {
                let stored = coordinator.load("shared-dep").unwrap().unwrap();
                Ok::<_, ()>((stored.state, stored.half_open_call_count))
            })
            .unwrap();
        assert_eq!(seen, (CircuitState::HalfOpen, 1));
        assert_eq!(
            coordinator.load("shared-dep").unwrap().map(|s| s.state),
            Some(CircuitState::Closed)
        );
    }

    #[test]
    fn test_nested_call_on_same_name_completes() {
        let (a, b, coordinator, _) = pair(GuardConfig::default().with_failure_threshold(3));

        let outer = a.call(|| {
            let inner = b.call(|| Err::<(), _>("cache miss"));
            Ok::<_, ()>(inner.unwrap_err().into_failure())
        });

        assert_eq!(outer.unwrap(), Some("cache miss"));
        // The outer success lands last and clears the inner failure
        assert_eq!(a.failure_count().unwrap(), 0);
        assert!(!coordinator.is_locked("shared-dep"));
    }

    #[test]
    fn test_outcome_survives_lease_expiry_during_operation() {
        use crate::coordinator::LockConfig;

        let coordinator = Arc::new(MemoryCoordinator::with_lock_config(
            LockConfig::default().with_lease_ttl(Duration::from_millis(20)),
        ));
        let config = GuardConfig::default().with_failure_threshold(5);
        let a = CoordinatedGuard::new("payments", config.clone(), coordinator.clone());
        let b = Arc::new(CoordinatedGuard::new("payments", config, coordinator.clone()));

        let result = a.call(|| {
            let other = Arc::clone(&b);
            std::thread::spawn(move || other.record_failure())
                .join()
                .expect("thread should not panic")
                .unwrap();
            std::thread::sleep(Duration::from_millis(100));
            Ok::<_, &str>("charged")
        });

        assert_eq!(result.unwrap(), "charged");
        assert_eq!(a.failure_count().unwrap(), 0);
    }

    #[test]
    fn test_failure_reported_after_store_cleared() {
        let (a, _, coordinator, _) = pair(GuardConfig::default().with_failure_threshold(3));

        let result = a.call(|| {
            coordinator.clear().unwrap();
            Err::<(), _>("charge failed")
        });

        assert_eq!(result.unwrap_err().into_failure(), Some("charge failed"));
        assert_eq!(a.failure_count().unwrap(), 1);
    }

    #[test]
    fn test_operation_value_returned_when_commit_fails() {
        let coordinator = Arc::new(FailingCommits::default());
        let guard = CoordinatedGuard::new("ledger", GuardConfig::default(), coordinator.clone());

        let result = guard.call(|| {
            coordinator.fail.store(true, Ordering::SeqCst);
            Ok::<_, ()>(42)
        });

        assert_eq!(result.unwrap(), 42);
        assert!(matches!(
            guard.record_failure(),
            Err(CoordinationError::Backend(_))
        ));
    }

    #[test]
    fn test_admission_failure_skips_operation() {
        let coordinator = Arc::new(FailingCommits::default());
        coordinator.fail.store(true, Ordering::SeqCst);
        let guard = CoordinatedGuard::new("ledger", GuardConfig::default(), coordinator);

        let mut ran = false;
        let result = guard.call(|| {
            ran = true;
            Ok::<_, ()>(())
        });

        assert!(result.unwrap_err().is_coordination());
        assert!(!ran);
    }

    #[test]
    fn test_panicking_call_recorded_as_failure() {
        let config = GuardConfig::default()
            .with_failure_threshold(1)
            .with_half_open_max_calls(1)
            .with_recovery_timeout(Duration::from_secs(10));
        let (a, b, coordinator, clock) = pair(config);
        a.record_failure().unwrap();
        clock.advance(Duration::from_secs(10));

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = a.call(|| -> Result<(), ()> { panic!("handler blew up") });
        }));
        assert!(result.is_err());

        let stored = coordinator.load("shared-dep").unwrap().unwrap();
        assert_eq!(stored.state, CircuitState::Open);
        assert_eq!(stored.half_open_call_count, 0);
        assert!(!coordinator.is_locked("shared-dep"));

        clock.advance(Duration::from_secs(10));
        b.call(|| Ok::<_, ()>(())).unwrap();
        assert_eq!(a.state().unwrap(), CircuitState::Closed);
    }

    #[test]
    fn test_accessors_inside_call_do_not_deadlock() {
        let (a, _, _, _) = pair(GuardConfig::default());
        let state = a.call(|| a.state().map_err(|_| ())).unwrap();
        assert_eq!(state, CircuitState::Closed);
    }

    #[test]
    fn test_reset_clears_shared_state() {
        let (a, b, _, _) = pair(GuardConfig::default().with_failure_threshold(1));
        a.record_failure().unwrap();
        assert_eq!(b.state().unwrap(), CircuitState::Open);

        b.reset().unwrap();
        assert_eq!(a.state().unwrap(), CircuitState::Closed);
        assert!(a.next_attempt_time().unwrap().is_none());
        assert!(a.last_failure_time().unwrap().is_none());
    }

    #[test]
    fn test_deleted_state_reads_as_fresh() {
        let (a, _, coordinator, _) = pair(GuardConfig::default().with_failure_threshold(1));
        a.record_failure().unwrap();
        coordinator.delete("shared-dep").unwrap();
        assert_eq!(a.state().unwrap(), CircuitState::Closed);
        assert_eq!(a.failure_count().unwrap(), 0);
    }

    #[test]
    fn test_lock_timeout_leaves_state_untouched() {
        use crate::coordinator::LockConfig;

        let coordinator = Arc::new(MemoryCoordinator::with_lock_config(
            LockConfig::default().with_acquire_timeout(Duration::from_millis(20)),
        ));
        let guard = Arc::new(CoordinatedGuard::new(
            "busy",
            GuardConfig::default(),
            coordinator.clone(),
        ));

        let lease = coordinator.acquire("busy").unwrap();
        let other = Arc::clone(&guard);
        let result = std::thread::spawn(move || other.record_failure())
            .join()
            .expect("thread should not panic");
        coordinator.release(&lease);

        assert!(matches!(result, Err(CoordinationError::LockTimeout { .. })));
        assert!(!coordinator.exists("busy").unwrap());
        assert_eq!(guard.failure_count().unwrap(), 0);
    }
}
