//! Per-name exclusive locks for in-process coordinators
//!
//! Each name has at most one holder. Waiters for a held name block on a
//! condition variable; waiters for different names never wait on each other.
//! A thread that already holds a name and asks for it again is refused with
//! [`CoordinationError::AlreadyLocked`] instead of deadlocking.
//!
//! Locks held past `lease_ttl` are stale and may be reclaimed by the next
//! waiter. Without a TTL a holder that never releases blocks its name forever.

use super::Lease;
use crate::error::CoordinationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lock acquisition and lease settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Give up waiting after this long (`None` waits indefinitely)
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Option<Duration>,
    /// Holders older than this may be reclaimed (`None` never expires)
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Option<Duration>,
}

impl LockConfig {
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = Some(ttl);
        self
    }
}

#[derive(Debug)]
struct Holder {
    id: u64,
    thread: ThreadId,
    acquired_at: Instant,
}

impl Holder {
    fn is_stale(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.acquired_at.elapsed() > ttl)
    }
}

/// Table of held locks keyed by name
#[derive(Debug)]
pub struct LockTable {
    config: LockConfig,
    holders: Mutex<HashMap<String, Holder>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl LockTable {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            holders: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Take the lock for `name`, waiting for the current holder if needed
    pub fn acquire(&self, name: &str) -> Result<Lease, CoordinationError> {
        let me = thread::current().id();
        let started = Instant::now();
        let mut holders = self.holders();

        loop {
            let holder = holders
                .get(name)
                .map(|h| (h.thread == me, h.is_stale(self.config.lease_ttl), h.id));

            match holder {
                None => break,
                Some((true, _, _)) => {
                    return Err(CoordinationError::AlreadyLocked {
                        name: name.to_string(),
                    });
                }
                Some((false, true, stale_id)) => {
                    warn!(lock = name, lease = stale_id, "reclaiming stale lock");
                    break;
                }
                Some((false, false, _)) => {
                    holders = self.wait(holders, name, started)?;
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        holders.insert(
            name.to_string(),
            Holder {
                id,
                thread: me,
                acquired_at: Instant::now(),
            },
        );
        debug!(lock = name, lease = id, "lock acquired");
        Ok(Lease::new(name, id))
    }

    /// Release a lease; ignored if it is no longer the current holder
    pub fn release(&self, lease: &Lease) {
        let mut holders = self.holders();
        if holders.get(lease.name()).is_some_and(|h| h.id == lease.id()) {
            holders.remove(lease.name());
            debug!(lock = lease.name(), lease = lease.id(), "lock released");
        }
        drop(holders);
        self.released.notify_all();
    }

    /// Check that `lease` is still the current holder of its name
    pub fn is_current(&self, lease: &Lease) -> bool {
        self.holders()
            .get(lease.name())
            .is_some_and(|h| h.id == lease.id())
    }

    /// Run `f` only while `lease` is current, keeping it current until `f` returns
    ///
    /// The holder table stays locked for the duration of `f`, so a waiter
    /// cannot reclaim the name between the check and the write. `f` must not
    /// call back into this table.
    pub fn with_current<R>(
        &self,
        lease: &Lease,
        f: impl FnOnce() -> Result<R, CoordinationError>,
    ) -> Result<R, CoordinationError> {
        let holders = self.holders();
        if !holders.get(lease.name()).is_some_and(|h| h.id == lease.id()) {
            return Err(CoordinationError::LeaseExpired {
                name: lease.name().to_string(),
            });
        }
        let result = f();
        drop(holders);
        result
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.holders().contains_key(name)
    }

    /// Forget every holder and wake all waiters
    pub fn clear(&self) {
        self.holders().clear();
        self.released.notify_all();
    }

    fn holders(&self) -> MutexGuard<'_, HashMap<String, Holder>> {
        self.holders.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait<'a>(
        &self,
        holders: MutexGuard<'a, HashMap<String, Holder>>,
        name: &str,
        started: Instant,
    ) -> Result<MutexGuard<'a, HashMap<String, Holder>>, CoordinationError> {
        // Wake periodically so stale holders are noticed without a release
        let mut slice = self.config.lease_ttl.unwrap_or(Duration::from_millis(100));

        if let Some(timeout) = self.config.acquire_timeout {
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(CoordinationError::LockTimeout {
                    name: name.to_string(),
                    waited,
                });
            }
            slice = slice.min(timeout - waited);
        }

        let (holders, _) = self
            .released
            .wait_timeout(holders, slice)
            .unwrap_or_else(|e| e.into_inner());
        Ok(holders)
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}
