/*!
 * Durable coordinator backends
 *
 * In-memory coordination lives in `tripwire_core_breaker`; backends here
 * persist guard state outside the process.
 */

#[cfg(feature = "redb")]
pub mod redb;

#[cfg(feature = "redb")]
pub use self::redb::RedbCoordinator;
