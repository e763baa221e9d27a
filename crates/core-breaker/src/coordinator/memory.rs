//! In-memory reference coordinator
//!
//! Keeps snapshots in a map and locks in a [`LockTable`]. Both live in this
//! process only: guards in different processes sharing a name will NOT see
//! each other's state. Multi-host deployments need a coordinator backed by
//! an external consistent store with real lease semantics.

use super::{Lease, LockConfig, LockTable, StateCoordinator};
use crate::error::CoordinationError;
use crate::snapshot::StateSnapshot;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Single-process coordinator
#[derive(Debug, Default)]
pub struct MemoryCoordinator {
    states: RwLock<HashMap<String, StateSnapshot>>,
    locks: LockTable,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_config(config: LockConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            locks: LockTable::new(config),
        }
    }

    /// Whether some caller currently holds the lock for `name`
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks.is_locked(name)
    }

    /// Names with stored state
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StateSnapshot>> {
        self.states.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StateSnapshot>> {
        self.states.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateCoordinator for MemoryCoordinator {
    fn load(&self, name: &str) -> Result<Option<StateSnapshot>, CoordinationError> {
        Ok(self.read().get(name).cloned())
    }

    fn save(&self, name: &str, snapshot: &StateSnapshot) -> Result<(), CoordinationError> {
        self.write().insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool, CoordinationError> {
        Ok(self.write().remove(name).is_some())
    }

    fn exists(&self, name: &str) -> Result<bool, CoordinationError> {
        Ok(self.read().contains_key(name))
    }

    fn clear(&self) -> Result<(), CoordinationError> {
        self.write().clear();
        self.locks.clear();
        Ok(())
    }

    fn acquire(&self, name: &str) -> Result<Lease, CoordinationError> {
        self.locks.acquire(name)
    }

    fn release(&self, lease: &Lease) {
        self.locks.release(lease);
    }

    fn commit(&self, lease: &Lease, snapshot: &StateSnapshot) -> Result<(), CoordinationError> {
        self.locks.with_current(lease, || self.save(lease.name(), snapshot))
    }
}
