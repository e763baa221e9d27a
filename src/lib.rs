/*!
 * Tripwire - circuit breakers with shared state
 *
 * Guards protect calls to unreliable dependencies:
 * - Three-state breaker (closed, open, half-open) with a cooldown and trial quota
 * - Thread-safe guards for one process
 * - Coordinated guards sharing state through a coordinator (in-memory or redb)
 * - A registry handing out one guard per name, configured from TOML
 * - Structured logging through `tracing`
 *
 * The state machine itself lives in `tripwire_core_breaker`, re-exported here.
 */

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;

// Re-export commonly used types
pub use config::{CoordinatorBackend, CoordinatorSettings, LogLevel, LoggingConfig, RegistryConfig};
pub use error::{Result, TripwireError};
pub use registry::{GuardHandle, GuardRegistry};
pub use tripwire_core_breaker::{
    CircuitState, Clock, CoordinatedGuard, CoordinationError, CoordinatorExt, FakeClock, Guard,
    GuardConfig, GuardError, LockConfig, LockUpdate, MemoryCoordinator, Rejection, SharedGuard,
    SnapshotError, StateCoordinator, StateSnapshot, SystemClock,
};

#[cfg(feature = "redb")]
pub use backend::RedbCoordinator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
