// =============================================================================
// Regime adapter — sentiment bands drive tunable parameter sets
// =============================================================================
//
// Shape grounded on the market regime detector: an ordered list of band
// rules evaluated top to bottom, each band pre-associated with a fixed
// parameter multiplier set, exposed as a small classifier polled from
// inbound events rather than a tick. Re-purposed here from technical
// indicators to a sentiment score band, consuming `SentimentChanged`
// events and writing through the same state-store-backed tunable
// interface the self-tuning loop uses.
// =============================================================================

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::config::Tunable;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::event_bus::{BackpressurePolicy, MessageType, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentBand {
    Fear,
    Bearish,
    Sideways,
    Bullish,
    Euphoria,
}

impl SentimentBand {
    /// Classify a sentiment score in `[-1.0, 1.0]`. Rules evaluated in order,
    /// first match wins; an out-of-range score clamps to the nearest band.
    pub fn classify(score: f64) -> Self {
        if score <= -0.6 {
            Self::Fear
        } else if score <= -0.2 {
            Self::Bearish
        } else if score < 0.2 {
            Self::Sideways
        } else if score < 0.6 {
            Self::Bullish
        } else {
            Self::Euphoria
        }
    }

    /// `(position_size_multiplier, stop_loss_multiplier, take_profit_multiplier, max_concurrent_positions)`.
    /// Euphoria deliberately reduces size and widens stops relative to
    /// Bullish — a euphoric market is treated as a fade-risk regime, not a
    /// green light to size up further.
    fn parameters(self) -> (f64, f64, f64, u32) {
        match self {
            Self::Fear => (0.3, 0.7, 0.7, 1),
            Self::Bearish => (0.6, 0.85, 0.85, 2),
            Self::Sideways => (1.0, 1.0, 1.0, 3),
            Self::Bullish => (1.3, 1.15, 1.2, 4),
            Self::Euphoria => (0.8, 1.3, 1.5, 2),
        }
    }
}

fn upsert_tunable(ctx: &CoreContext, name: &str, value: f64) {
    let mut cfg = ctx.config.write();
    cfg.tunables
        .entry(name.to_string())
        .and_modify(|t| t.value = value)
        .or_insert(Tunable { name: name.to_string(), value, min: 0.1, max: 3.0, step: 0.05, affects_metrics: vec![] });
}

pub struct RegimeAdapter {
    ctx: CoreContext,
}

impl RegimeAdapter {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    fn last_band(&self) -> Option<SentimentBand> {
        self.ctx
            .state_store
            .get_param("regime_adapter_last_band")
            .and_then(|v| serde_json::from_value(v).ok())
    }

    fn apply_band(&self, band: SentimentBand) -> Result<(), CoreError> {
        if self.last_band() == Some(band) {
            return Ok(());
        }

        let (size_mult, stop_mult, tp_mult, max_positions) = band.parameters();
        upsert_tunable(&self.ctx, "position_size_multiplier", size_mult);
        upsert_tunable(&self.ctx, "stop_loss_multiplier", stop_mult);
        upsert_tunable(&self.ctx, "take_profit_multiplier", tp_mult);
        {
            let mut cfg = self.ctx.config.write();
            cfg.max_concurrent_positions = max_positions;
        }
        self.ctx.save_config()?;
        self.ctx
            .state_store
            .set_param("regime_adapter_last_band", serde_json::to_value(band)?)?;

        info!(?band, size_mult, stop_mult, tp_mult, max_positions, "regime adapter updated tunables");
        Ok(())
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), CoreError> {
        let (_handle, mut rx) = self.ctx.event_bus.subscribe(Subscription {
            subscriber: "regime_adapter".to_string(),
            types: [MessageType::SentimentChanged].into_iter().collect(),
            policy: BackpressurePolicy::CoalesceByKey,
            queue_capacity: 64,
            filter_predicate: None,
        });

        info!("regime adapter started");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                maybe_msg = rx.recv() => {
                    let Some(msg) = maybe_msg else { return Ok(()) };
                    if let Some(score) = msg.data.get("score").and_then(|v| v.as_f64()) {
                        let band = SentimentBand::classify(score);
                        self.apply_band(band)?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::event_bus::EventBus;
    use crate::learning_store::LearningStore;
    use crate::lock_manager::LockManager;
    use crate::state_store::StateStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> (tempfile::TempDir, CoreContext) {
        let dir = tempfile::tempdir().unwrap();
        let state_store = Arc::new(StateStore::open(dir.path().join("state")).unwrap());
        let lock_manager = Arc::new(LockManager::new(dir.path().join("locks"), Duration::from_secs(60)));
        let event_bus = Arc::new(EventBus::new());
        let learning_store = Arc::new(LearningStore::open(dir.path().join("learnings.log"), 0.7).unwrap());
        let ctx = CoreContext::new(
            RuntimeConfig::default(),
            state_store,
            lock_manager,
            event_bus,
            learning_store,
            dir.path().join("config.json"),
        );
        (dir, ctx)
    }

    #[test]
    fn classify_bands_in_order() {
        assert_eq!(SentimentBand::classify(-0.9), SentimentBand::Fear);
        assert_eq!(SentimentBand::classify(-0.3), SentimentBand::Bearish);
        assert_eq!(SentimentBand::classify(0.0), SentimentBand::Sideways);
        assert_eq!(SentimentBand::classify(0.4), SentimentBand::Bullish);
        assert_eq!(SentimentBand::classify(0.9), SentimentBand::Euphoria);
    }

    #[test]
    fn apply_band_updates_tunables_and_max_positions() {
        let (_dir, ctx) = context();
        let adapter = RegimeAdapter::new(ctx.clone());
        adapter.apply_band(SentimentBand::Fear).unwrap();

        let cfg = ctx.config.read();
        assert_eq!(cfg.max_concurrent_positions, 1);
        assert!((cfg.tunables["position_size_multiplier"].value - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn reapplying_same_band_is_a_no_op() {
        let (_dir, ctx) = context();
        let adapter = RegimeAdapter::new(ctx.clone());
        adapter.apply_band(SentimentBand::Bullish).unwrap();
        let audit_before = ctx.state_store.read_audit(None).unwrap().len();
        adapter.apply_band(SentimentBand::Bullish).unwrap();
        let audit_after = ctx.state_store.read_audit(None).unwrap().len();
        assert_eq!(audit_before, audit_after);
    }
}
