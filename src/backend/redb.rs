//! redb coordinator backend
//!
//! Snapshots are stored as JSON documents in one table keyed by guard name,
//! so state survives process restarts. redb takes an exclusive lock on the
//! database file: one process owns it, and locking is done in-process with a
//! [`LockTable`]. This is durable, not distributed.

use redb::{Database, ReadableTable, TableDefinition};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tripwire_core_breaker::{
    CoordinationError, Lease, LockConfig, LockTable, SnapshotError, StateCoordinator,
    StateSnapshot,
};

const GUARD_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("guard_state");

/// redb-backed state coordinator
pub struct RedbCoordinator {
    db: Database,
    path: PathBuf,
    locks: LockTable,
}

impl RedbCoordinator {
    /// Open or create a database at `path`
    pub fn open<P: AsRef<Path>>(path: P, lock_config: LockConfig) -> Result<Self, CoordinationError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(backend)?;

        let write_txn = db.begin_write().map_err(backend)?;
        {
            let _state = write_txn.open_table(GUARD_STATE).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;

        info!(path = %path.display(), "opened redb coordinator");
        Ok(Self {
            db,
            path,
            locks: LockTable::new(lock_config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.locks.is_locked(name)
    }

    /// Names with stored state, in key order
    pub fn names(&self) -> Result<Vec<String>, CoordinationError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(GUARD_STATE).map_err(backend)?;
        let mut names = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (key, _) = entry.map_err(backend)?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<StateSnapshot, CoordinationError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| SnapshotError::Json(format!("stored state for '{}': {}", name, e)))?;
        Ok(StateSnapshot::from_json(text)?)
    }
}

impl fmt::Debug for RedbCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbCoordinator")
            .field("path", &self.path)
            .field("locks", &self.locks)
            .finish()
    }
}

impl StateCoordinator for RedbCoordinator {
    fn load(&self, name: &str) -> Result<Option<StateSnapshot>, CoordinationError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(GUARD_STATE).map_err(backend)?;
        let stored = table.get(name).map_err(backend)?;
        match stored {
            Some(bytes) => Self::decode(name, bytes.value()).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, name: &str, snapshot: &StateSnapshot) -> Result<(), CoordinationError> {
        let json = snapshot.to_json();
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(GUARD_STATE).map_err(backend)?;
            table.insert(name, json.as_bytes()).map_err(backend)?;
        }
        write_txn.commit().map_err(backend)?;
        debug!(guard = name, state = %snapshot.state, "snapshot saved");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool, CoordinationError> {
        let write_txn = self.db.begin_write().map_err(backend)?;
        let existed = {
            let mut table = write_txn.open_table(GUARD_STATE).map_err(backend)?;
            let removed = table.remove(name).map_err(backend)?;
            removed.is_some()
        };
        write_txn.commit().map_err(backend)?;
        Ok(existed)
    }

    fn exists(&self, name: &str) -> Result<bool, CoordinationError> {
        let read_txn = self.db.begin_read().map_err(backend)?;
        let table = read_txn.open_table(GUARD_STATE).map_err(backend)?;
        let stored = table.get(name).map_err(backend)?;
        Ok(stored.is_some())
    }

    fn clear(&self) -> Result<(), CoordinationError> {
        let names = self.names()?;
        let write_txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = write_txn.open_table(GUARD_STATE).map_err(backend)?;
            for name in &names {
                table.remove(name.as_str()).map_err(backend)?;
            }
        }
        write_txn.commit().map_err(backend)?;
        self.locks.clear();
        info!(removed = names.len(), "cleared redb coordinator");
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

fn backend(e: impl fmt::Display) -> CoordinationError {
    CoordinationError::Backend(e.to_string())
}
