// =============================================================================
// Runtime Configuration — hot-reloadable core settings with atomic save
// =============================================================================
//
// Everything a component needs to tune without a restart lives here. Every
// field carries a serde default so that loading a config file written by an
// older binary never fails — missing fields just fall back.
//
// Secrets never live in this struct; they are resolved through the secret
// provider (see `secrets.rs`) at the point of use.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CoreResult;

fn default_true() -> bool {
    true
}

fn default_max_concurrent_positions() -> u32 {
    3
}

fn default_lock_ttl_s() -> u64 {
    60
}

fn default_learning_confidence_alpha() -> f64 {
    0.7
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_window_s() -> u64 {
    300
}

fn default_breaker_cooldown_s() -> u64 {
    60
}

/// Default thresholds shared by any circuit breaker that doesn't declare its
/// own at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerDefaults {
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,
    #[serde(default = "default_breaker_window_s")]
    pub window_s: u64,
    #[serde(default = "default_breaker_cooldown_s")]
    pub cooldown_s: u64,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            window_s: default_breaker_window_s(),
            cooldown_s: default_breaker_cooldown_s(),
        }
    }
}

/// A single tunable knob declared by the self-tuning loop (C9) and mutated
/// only through `CoreContext::set_param`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunable {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    #[serde(default)]
    pub affects_metrics: Vec<String>,
}

/// Top-level runtime configuration for the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// When set, the trade engine denies all new opens.
    #[serde(default)]
    pub kill_switch: bool,
    #[serde(default)]
    pub kill_switch_reason: Option<String>,

    /// Whether trading is enabled at all (distinct from the kill switch —
    /// this is the operator's "go/no-go", the kill switch is the emergency
    /// brake).
    #[serde(default)]
    pub trading_enabled: bool,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    #[serde(default)]
    pub breaker_defaults: BreakerDefaults,

    #[serde(default = "default_lock_ttl_s")]
    pub lock_ttl_s: u64,

    #[serde(default = "default_learning_confidence_alpha")]
    pub learning_confidence_alpha: f64,

    #[serde(default = "default_true")]
    pub autonomous_loops_enabled: bool,

    #[serde(default)]
    pub tunables: HashMap<String, Tunable>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kill_switch: false,
            kill_switch_reason: None,
            trading_enabled: false,
            max_concurrent_positions: default_max_concurrent_positions(),
            breaker_defaults: BreakerDefaults::default(),
            lock_ttl_s: default_lock_ttl_s(),
            learning_confidence_alpha: default_learning_confidence_alpha(),
            autonomous_loops_enabled: true,
            tunables: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`, falling back to
    /// defaults with a logged warning if the file is missing.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(mut cfg) => {
                    cfg.learning_confidence_alpha = cfg.learning_confidence_alpha.clamp(0.5, 0.9);
                    info!(path = %path.display(), "runtime config loaded");
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse runtime config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                warn!(path = %path.display(), "runtime config not found, using defaults");
                Self::default()
            }
        }
    }

    /// Persist the configuration atomically (write to `.tmp`, fsync, rename).
    pub fn save(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)?;
        {
            let f = std::fs::File::open(&tmp_path)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)?;
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    pub fn set_kill_switch(&mut self, reason: impl Into<String>) {
        self.kill_switch = true;
        self.kill_switch_reason = Some(reason.into());
    }

    pub fn clear_kill_switch(&mut self) {
        self.kill_switch = false;
        self.kill_switch_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_safe_by_default() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.trading_enabled);
        assert!(!cfg.kill_switch);
        assert_eq!(cfg.max_concurrent_positions, 3);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.lock_ttl_s, 60);
        assert!((cfg.learning_confidence_alpha - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load("/nonexistent/path/runtime_config.json");
        assert!(!cfg.trading_enabled);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_config.json");
        let mut cfg = RuntimeConfig::default();
        cfg.set_kill_switch("manual test");
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path);
        assert!(loaded.kill_switch);
        assert_eq!(loaded.kill_switch_reason.as_deref(), Some("manual test"));
    }

    #[test]
    fn load_alpha_out_of_range_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime_config.json");
        std::fs::write(&path, r#"{"learning_confidence_alpha": 0.99}"#).unwrap();
        let cfg = RuntimeConfig::load(&path);
        assert!((cfg.learning_confidence_alpha - 0.9).abs() < f64::EPSILON);
    }
}
