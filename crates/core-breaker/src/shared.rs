//! Thread-safe handle around a single in-process guard

use crate::clock::Clock;
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::guard::Guard;
use crate::snapshot::StateSnapshot;
use crate::state::CircuitState;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// A [`Guard`] shared between threads of one process
///
/// The lock is held only while admitting a call and while recording its
/// outcome, never while the protected operation runs.
#[derive(Debug)]
pub struct SharedGuard {
    inner: Mutex<Guard>,
}

impl SharedGuard {
    /// Wrap an existing guard
    pub fn new(guard: Guard) -> Self {
        Self {
            inner: Mutex::new(guard),
        }
    }

    /// Build a guard whose timestamps come from `clock`
    pub fn with_clock(name: impl Into<String>, config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(Guard::with_clock(name, config, clock))
    }

    /// Name of the protected dependency
    pub fn name(&self) -> String {
        self.lock().name().to_string()
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    /// Consecutive failures since the last success or reset
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count()
    }

    /// Whether a call made now would be admitted
    pub fn allows_calls(&self) -> bool {
        self.lock().allows_calls()
    }

    /// Current state, stamped with the guard's clock
    pub fn snapshot(&self) -> StateSnapshot {
        self.lock().snapshot()
    }

    /// Run `op` under circuit protection
    ///
    /// A panic in `op` is recorded as a failure before it is resumed.
    pub fn call<T, E, F>(&self, op: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.lock().try_acquire()?;

        match panic::catch_unwind(AssertUnwindSafe(op)) {
            Ok(Ok(value)) => {
                self.lock().record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.lock().record_failure();
                Err(GuardError::Failed(e))
            }
            Err(payload) => {
                // Give back the admission by recording the panic as a failure
                let mut guard = self.lock();
                warn!(guard = %guard.name(), "guarded operation panicked");
                guard.record_failure();
                drop(guard);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Record a success observed outside [`call`](Self::call)
    pub fn record_success(&self) {
        self.lock().record_success();
    }

    /// Record a failure observed outside [`call`](Self::call)
    pub fn record_failure(&self) {
        self.lock().record_failure();
    }

    /// Force the circuit back to closed
    pub fn reset(&self) {
        self.lock().reset();
    }

    fn lock(&self) -> MutexGuard<'_, Guard> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
