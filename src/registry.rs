/*!
 * Named guard registry
 *
 * Hands out one guard per name. Without a coordinator each guard is a
 * process-local [`SharedGuard`]; with one, every guard is a
 * [`CoordinatedGuard`] over the registry's coordinator, so separate
 * registries sharing a coordinator share state by name.
 */

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use tripwire_core_breaker::{
    CircuitState, Clock, CoordinatedGuard, CoordinationError, GuardConfig, GuardError,
    MemoryCoordinator, SharedGuard, StateCoordinator, StateSnapshot, SystemClock,
};

use crate::config::{CoordinatorBackend, RegistryConfig};
use crate::error::{Result, TripwireError};

/// A guard handed out by the registry
#[derive(Debug)]
pub enum GuardHandle {
    /// State lives in this process only
    Local(SharedGuard),
    /// State lives in the registry's coordinator
    Coordinated(CoordinatedGuard),
}

impl GuardHandle {
    pub fn name(&self) -> String {
        match self {
            GuardHandle::Local(g) => g.name(),
            GuardHandle::Coordinated(g) => g.name().to_string(),
        }
    }

    pub fn is_coordinated(&self) -> bool {
        matches!(self, GuardHandle::Coordinated(_))
    }

    pub fn state(&self) -> std::result::Result<CircuitState, CoordinationError> {
        match self {
            GuardHandle::Local(g) => Ok(g.state()),
            GuardHandle::Coordinated(g) => g.state(),
        }
    }

    pub fn failure_count(&self) -> std::result::Result<u32, CoordinationError> {
        match self {
            GuardHandle::Local(g) => Ok(g.failure_count()),
            GuardHandle::Coordinated(g) => g.failure_count(),
        }
    }

    pub fn allows_calls(&self) -> std::result::Result<bool, CoordinationError> {
        match self {
            GuardHandle::Local(g) => Ok(g.allows_calls()),
            GuardHandle::Coordinated(g) => g.allows_calls(),
        }
    }

    pub fn snapshot(&self) -> std::result::Result<StateSnapshot, CoordinationError> {
        match self {
            GuardHandle::Local(g) => Ok(g.snapshot()),
            GuardHandle::Coordinated(g) => g.snapshot(),
        }
    }

    /// Run `op` under circuit protection
    pub fn call<T, E, F>(&self, op: F) -> std::result::Result<T, GuardError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        match self {
            GuardHandle::Local(g) => g.call(op),
            GuardHandle::Coordinated(g) => g.call(op),
        }
    }

    pub fn record_success(&self) -> std::result::Result<(), CoordinationError> {
        match self {
            GuardHandle::Local(g) => {
                g.record_success();
                Ok(())
            }
            GuardHandle::Coordinated(g) => g.record_success(),
        }
    }

    pub fn record_failure(&self) -> std::result::Result<(), CoordinationError> {
        match self {
            GuardHandle::Local(g) => {
                g.record_failure();
                Ok(())
            }
            GuardHandle::Coordinated(g) => g.record_failure(),
        }
    }

    pub fn reset(&self) -> std::result::Result<(), CoordinationError> {
        match self {
            GuardHandle::Local(g) => {
                g.reset();
                Ok(())
            }
            GuardHandle::Coordinated(g) => g.reset(),
        }
    }
}

/// Registry of guards keyed by name
#[derive(Debug)]
pub struct GuardRegistry {
    defaults: GuardConfig,
    overrides: BTreeMap<String, GuardConfig>,
    clock: Arc<dyn Clock>,
    coordinator: Option<Arc<dyn StateCoordinator>>,
    guards: RwLock<HashMap<String, Arc<GuardHandle>>>,
}

impl GuardRegistry {
    /// Create a registry of process-local guards
    pub fn new(defaults: GuardConfig) -> Self {
        Self {
            defaults,
            overrides: BTreeMap::new(),
            clock: Arc::new(SystemClock),
            coordinator: None,
            guards: RwLock::new(HashMap::new()),
        }
    }

    /// Use `clock` for guards created from now on
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Back guards created from now on with `coordinator`
    pub fn with_coordinator(mut self, coordinator: Arc<dyn StateCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Build a registry, and its coordinator, from configuration
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;

        let mut registry = Self::new(config.defaults.clone());
        registry.overrides = config.guards.clone();

        let settings = &config.coordinator;
        let coordinator: Option<Arc<dyn StateCoordinator>> = match settings.backend {
            CoordinatorBackend::None => None,
            CoordinatorBackend::Memory => Some(Arc::new(MemoryCoordinator::with_lock_config(
                settings.lock_config(),
            ))),
            CoordinatorBackend::Redb => Some(open_redb(config)?),
        };

        info!(
            backend = ?settings.backend,
            overrides = registry.overrides.len(),
            "guard registry configured"
        );
        registry.coordinator = coordinator;
        Ok(registry)
    }

    /// Guard for `name`, created with its configured settings on first use
    pub fn get(&self, name: &str) -> Arc<GuardHandle> {
        let config = self
            .overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        self.get_with_config(name, config)
    }

    /// Guard for `name`; `config` is used only if the guard does not exist yet
    pub fn get_with_config(&self, name: &str, config: GuardConfig) -> Arc<GuardHandle> {
        if let Some(existing) = self.read().get(name) {
            return Arc::clone(existing);
        }

        let mut guards = self.write();
        let handle = guards.entry(name.to_string()).or_insert_with(|| {
            debug!(
                guard = name,
                coordinated = self.coordinator.is_some(),
                "creating guard"
            );
            Arc::new(self.build(name, config))
        });
        Arc::clone(handle)
    }

    /// Reset the guard for `name`; false if the registry has no such guard
    pub fn reset(&self, name: &str) -> Result<bool> {
        let handle = self.read().get(name).cloned();
        match handle {
            Some(handle) => {
                handle.reset()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reset every guard, stopping at the first coordination failure
    pub fn reset_all(&self) -> Result<()> {
        let handles: Vec<Arc<GuardHandle>> = self.read().values().cloned().collect();
        for handle in &handles {
            handle.reset()?;
        }
        info!(guards = handles.len(), "all guards reset");
        Ok(())
    }

    /// Forget the guard for `name`. Shared state in the coordinator is kept.
    pub fn remove(&self, name: &str) -> Option<Arc<GuardHandle>> {
        self.write().remove(name)
    }

    /// Names of the guards created so far, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn coordinator(&self) -> Option<&Arc<dyn StateCoordinator>> {
        self.coordinator.as_ref()
    }

    fn build(&self, name: &str, config: GuardConfig) -> GuardHandle {
        let clock = Arc::clone(&self.clock);
        match self.coordinator {
            Some(ref coordinator) => GuardHandle::Coordinated(CoordinatedGuard::with_clock(
                name,
                config,
                Arc::clone(coordinator),
                clock,
            )),
            None => GuardHandle::Local(SharedGuard::with_clock(name, config, clock)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<GuardHandle>>> {
        self.guards.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<GuardHandle>>> {
        self.guards.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for GuardRegistry {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

#[cfg(feature = "redb")]
fn open_redb(config: &RegistryConfig) -> Result<Arc<dyn StateCoordinator>> {
    let path = config.coordinator.path.as_ref().ok_or_else(|| {
        TripwireError::Config("coordinator backend 'redb' requires a path".to_string())
    })?;
    let coordinator =
        crate::backend::RedbCoordinator::open(path, config.coordinator.lock_config())?;
    Ok(Arc::new(coordinator))
}

#[cfg(not(feature = "redb"))]
fn open_redb(_config: &RegistryConfig) -> Result<Arc<dyn StateCoordinator>> {
    Err(TripwireError::Config(
        "coordinator backend 'redb' requires the 'redb' feature".to_string(),
    ))
}
