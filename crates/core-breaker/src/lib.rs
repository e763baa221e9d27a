//! Tripwire Core Breaker: circuit breaker state machine with shared-state coordination
//!
//! # Overview
//!
//! A guard protects calls to one unreliable dependency. It counts failures,
//! trips OPEN once they reach a threshold, rejects calls during a cooldown and
//! then admits a limited number of trial calls (HALF_OPEN) before deciding to
//! close again or re-open.
//!
//! - **Guard**: single-owner state machine, driven by an injectable [`Clock`]
//! - **SharedGuard**: one guard shared between threads of a process
//! - **CoordinatedGuard**: many workers sharing one logical guard through a
//!   [`StateCoordinator`]
//! - **StateSnapshot**: portable form of a guard's state with a JSON codec
//!
//! # State Machine
//!
//! ```text
//!              failures >= threshold
//!   ┌────────┐ ─────────────────────▶ ┌────────┐
//!   │ CLOSED │                        │  OPEN  │ ◀─┐
//!   └────────┘ ◀──┐                   └────────┘   │
//!                 │                        │       │ any failure
//!   trial quota   │      cooldown elapsed  │       │
//!   succeeded     │                        ▼       │
//!                 │                   ┌───────────┐│
//!                 └────────────────── │ HALF_OPEN │┘
//!                                     └───────────┘
//! ```
//!
//! # Coordination
//!
//! Coordinated guards perform every mutation as a locked read-modify-write
//! against the coordinator, so counts and transitions are linearized across
//! workers. [`MemoryCoordinator`] keeps everything in-process; it does not
//! coordinate separate processes.
//!
//! # Usage Example
//!
//! ```
//! use tripwire_core_breaker::{CircuitState, Guard, GuardConfig};
//! use std::time::Duration;
//!
//! let config = GuardConfig::default()
//!     .with_failure_threshold(2)
//!     .with_recovery_timeout(Duration::from_secs(30));
//! let mut guard = Guard::new("inventory-api", config);
//!
//! for _ in 0..2 {
//!     let _ = guard.call(|| Err::<(), _>("connection refused"));
//! }
//! assert_eq!(guard.state(), CircuitState::Open);
//!
//! let rejected = guard.call(|| Ok::<_, &str>(42)).unwrap_err();
//! assert!(rejected.is_rejected());
//! ```

pub mod clock;
pub mod config;
pub mod coordinated;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod shared;
pub mod snapshot;
pub mod state;

// Re-export main types for convenience
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::GuardConfig;
pub use coordinated::CoordinatedGuard;
pub use coordinator::{
    CoordinatorExt, Lease, LockConfig, LockTable, LockUpdate, MemoryCoordinator, StateCoordinator,
};
pub use error::{CoordinationError, GuardError, Rejection, SnapshotError};
pub use guard::Guard;
pub use shared::SharedGuard;
pub use snapshot::StateSnapshot;
pub use state::CircuitState;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tripwire_core_breaker::prelude::*;
/// ```
pub mod prelude {
    pub use super::clock::{Clock, SystemClock};
    pub use super::config::GuardConfig;
    pub use super::coordinated::CoordinatedGuard;
    pub use super::coordinator::{CoordinatorExt, LockUpdate, MemoryCoordinator, StateCoordinator};
    pub use super::error::{CoordinationError, GuardError, Rejection};
    pub use super::guard::Guard;
    pub use super::shared::SharedGuard;
    pub use super::snapshot::StateSnapshot;
    pub use super::state::CircuitState;
}
