// =============================================================================
// CoreContext — the single explicit handle threaded through every component
// =============================================================================
//
// Replaces the module-level singletons a naive port of this system would
// reach for. Every component factory receives a clone of `CoreContext`
// instead of calling into global getters; components hold no references to
// each other, only to shared handles reached through this context (see the
// design notes in DESIGN.md on routing cross-component traffic through the
// event bus instead of direct calls).
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::RuntimeConfig;
use crate::event_bus::EventBus;
use crate::learning_store::LearningStore;
use crate::lock_manager::LockManager;
use crate::state_store::StateStore;

/// Shared handles every component is constructed with.
#[derive(Clone)]
pub struct CoreContext {
    pub config: Arc<RwLock<RuntimeConfig>>,
    pub state_store: Arc<StateStore>,
    pub lock_manager: Arc<LockManager>,
    pub event_bus: Arc<EventBus>,
    pub learning_store: Arc<LearningStore>,
    pub config_path: PathBuf,
}

impl CoreContext {
    pub fn new(
        config: RuntimeConfig,
        state_store: Arc<StateStore>,
        lock_manager: Arc<LockManager>,
        event_bus: Arc<EventBus>,
        learning_store: Arc<LearningStore>,
        config_path: PathBuf,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            state_store,
            lock_manager,
            event_bus,
            learning_store,
            config_path,
        }
    }

    /// Persist the in-memory config to disk, e.g. on shutdown or after a
    /// tunable mutation.
    pub fn save_config(&self) -> crate::error::CoreResult<()> {
        self.config.read().save(&self.config_path)
    }

    pub fn is_trading_allowed(&self) -> Result<(), String> {
        let cfg = self.config.read();
        if cfg.kill_switch {
            return Err(cfg
                .kill_switch_reason
                .clone()
                .unwrap_or_else(|| "kill switch active".to_string()));
        }
        if !cfg.trading_enabled {
            return Err("trading not enabled".to_string());
        }
        Ok(())
    }
}
