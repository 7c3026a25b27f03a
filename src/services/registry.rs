//! Process-wide manager slot
//!
//! `ManagerRegistry` is an ordinary value so tests can own private
//! registries; the process-wide one backs `Manager::shared` and
//! `Manager::init_with_configuration`.

use crate::infra::config::Configuration;
use crate::services::manager::{InitError, Manager};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

pub struct ManagerRegistry {
    slot: RwLock<Option<Arc<Manager>>>,
}

static GLOBAL: ManagerRegistry = ManagerRegistry::new();

/// The process-wide registry
pub fn global() -> &'static ManagerRegistry {
    &GLOBAL
}

impl ManagerRegistry {
    pub const fn new() -> Self {
        Self { slot: parking_lot::const_rwlock(None) }
    }

    pub fn shared(&self) -> Option<Arc<Manager>> {
        self.slot.read().clone()
    }

    /// Atomically replace the slot; returns the previous instance
    pub fn install(&self, manager: Arc<Manager>) -> Option<Arc<Manager>> {
        self.slot.write().replace(manager)
    }

    /// Build a manager and install it
    ///
    /// On error the slot is left untouched. A replaced instance is shut
    /// down: it no longer accepts signals, its delivery threads exit and its
    /// handlers are released. Holders of it can still read state.
    pub fn init_with_configuration(&self, config: Configuration) -> Result<Arc<Manager>, InitError> {
        let manager = Arc::new(Manager::new(config)?);
        if let Some(previous) = self.install(manager.clone()) {
            previous.shutdown();
            info!("manager_replaced");
        }
        Ok(manager)
    }

    /// Empty the slot; returns the instance that was installed
    pub fn clear(&self) -> Option<Arc<Manager>> {
        self.slot.write().take()
    }
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
