//! Error types for guarded calls, coordination and snapshot decoding

use crate::state::CircuitState;
use std::time::Duration;
use thiserror::Error;

/// The guard refused to invoke the operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is {state}, call rejected")]
pub struct Rejection {
    /// Name of the protected dependency
    pub name: String,
    /// State at the moment of rejection
    pub state: CircuitState,
}

/// Outcome of a guarded call that did not produce a value
///
/// `E` is the error type of the protected operation and is passed back
/// untouched in [`GuardError::Failed`].
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// Fast local refusal; the operation was never invoked
    #[error(transparent)]
    Rejected(Rejection),

    /// The operation ran and failed
    #[error("guarded operation failed: {0}")]
    Failed(E),

    /// Shared state could not be locked, loaded or persisted
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
}

impl<E> GuardError<E> {
    /// Check if the guard refused the call
    pub fn is_rejected(&self) -> bool {
        matches!(self, GuardError::Rejected(_))
    }

    /// Check if the operation itself failed
    pub fn is_failure(&self) -> bool {
        matches!(self, GuardError::Failed(_))
    }

    /// Check if coordination failed
    pub fn is_coordination(&self) -> bool {
        matches!(self, GuardError::Coordination(_))
    }

    /// Recover the operation's own error, if that is what this is
    pub fn into_failure(self) -> Option<E> {
        match self {
            GuardError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<Rejection> for GuardError<E> {
    fn from(rejection: Rejection) -> Self {
        GuardError::Rejected(rejection)
    }
}

/// Errors raised by a [`StateCoordinator`](crate::coordinator::StateCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinationError {
    /// The calling thread already holds the lock for this name
    #[error("lock for '{name}' is already held by this caller")]
    AlreadyLocked { name: String },

    /// Gave up waiting for another holder to release the lock
    #[error("timed out after {waited:?} waiting for lock on '{name}'")]
    LockTimeout { name: String, waited: Duration },

    /// The lease was reclaimed before the holder committed
    #[error("lease on '{name}' expired before commit")]
    LeaseExpired { name: String },

    /// The backing store failed
    #[error("coordinator backend error: {0}")]
    Backend(String),

    /// Stored state could not be decoded
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl CoordinationError {
    /// Check if this error means the lock was never obtained
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            CoordinationError::AlreadyLocked { .. } | CoordinationError::LockTimeout { .. }
        )
    }
}

/// Errors raised while decoding a persisted snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// A required field is absent or null
    #[error("snapshot is missing required field '{0}'")]
    MissingField(&'static str),

    /// The state token is not one of closed, open, half_open
    #[error("unrecognized circuit state '{0}'")]
    UnknownState(String),

    /// A field is present but has the wrong shape
    #[error("invalid snapshot field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// The input is not a JSON object
    #[error("malformed snapshot document: {0}")]
    Json(String),
}
