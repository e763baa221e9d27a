//! Shared state coordination for guards running in many workers
//!
//! A [`StateCoordinator`] stores one [`StateSnapshot`] per guard name and
//! provides a per-name exclusive lock. [`CoordinatorExt::with_lock`] combines
//! the two into a locked read-modify-write:
//!
//! ```text
//! acquire(name) ─▶ load(name) ─▶ f(snapshot) ─▶ commit(new snapshot) ─▶ release
//!                                     │
//!                                     └─ Keep: nothing persisted
//! ```
//!
//! The lock is released exactly once, whether `f` returns or panics.

pub mod lock;
pub mod memory;

use crate::error::CoordinationError;
use crate::snapshot::StateSnapshot;
use std::fmt;

pub use lock::{LockConfig, LockTable};
pub use memory::MemoryCoordinator;

/// Proof of holding the lock for one name
///
/// The id distinguishes successive holders, so a holder whose lease was
/// reclaimed cannot release or commit over its successor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    name: String,
    id: u64,
}

impl Lease {
    pub fn new(name: impl Into<String>, id: u64) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Result of a [`with_lock`](CoordinatorExt::with_lock) callback
#[derive(Debug)]
pub enum LockUpdate<R> {
    /// Persist the snapshot as the new state, then return the value
    Persist(StateSnapshot, R),
    /// Leave the stored state untouched
    Keep(R),
}

/// Storage and locking backend for guard snapshots
///
/// Implementations must serialize `acquire` for the same name, must not
/// block `acquire` across different names, and must reject re-entry by the
/// current holder with [`CoordinationError::AlreadyLocked`].
pub trait StateCoordinator: Send + Sync + fmt::Debug {
    /// Read the current snapshot; `None` means a fresh guard
    fn load(&self, name: &str) -> Result<Option<StateSnapshot>, CoordinationError>;

    /// Overwrite the snapshot unconditionally
    fn save(&self, name: &str, snapshot: &StateSnapshot) -> Result<(), CoordinationError>;

    /// Remove the snapshot, returning whether one existed
    fn delete(&self, name: &str) -> Result<bool, CoordinationError>;

    fn exists(&self, name: &str) -> Result<bool, CoordinationError>;

    /// Drop all snapshots and all locks. Not for use under load.
    fn clear(&self) -> Result<(), CoordinationError>;

    /// Block until the lock for `name` is free and take it
    fn acquire(&self, name: &str) -> Result<Lease, CoordinationError>;

    /// Give the lock back. A lease that is no longer current is ignored.
    fn release(&self, lease: &Lease);

    /// Save under a lease, failing if the lease is no longer current
    fn commit(&self, lease: &Lease, snapshot: &StateSnapshot) -> Result<(), CoordinationError>;
}

/// Locked read-modify-write on any coordinator, including trait objects
pub trait CoordinatorExt {
    fn with_lock<R, F>(&self, name: &str, f: F) -> Result<R, CoordinationError>
    where
        F: FnOnce(Option<StateSnapshot>) -> LockUpdate<R>;
}

impl<C: StateCoordinator + ?Sized> CoordinatorExt for C {
    fn with_lock<R, F>(&self, name: &str, f: F) -> Result<R, CoordinationError>
    where
        F: FnOnce(Option<StateSnapshot>) -> LockUpdate<R>,
    {
        let held = HeldLock {
            coordinator: self,
            lease: self.acquire(name)?,
        };

        let current = self.load(name)?;
        match f(current) {
            LockUpdate::Persist(snapshot, value) => {
                self.commit(&held.lease, &snapshot)?;
                Ok(value)
            }
            LockUpdate::Keep(value) => Ok(value),
        }
    }
}

/// Releases the lease when dropped
struct HeldLock<'a, C: StateCoordinator + ?Sized> {
    coordinator: &'a C,
    lease: Lease,
}

impl<C: StateCoordinator + ?Sized> Drop for HeldLock<'_, C> {
    fn drop(&mut self) {
        self.coordinator.release(&self.lease);
    }
}
