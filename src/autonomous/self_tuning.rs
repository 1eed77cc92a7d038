// =============================================================================
// Self-tuning loop — hill-climb optimizer over declared tunables
// =============================================================================
//
// Ticks on an interval (shape grounded on the exit monitor's periodic-tick
// loop). Each tick samples an aggregate outcome metric — the learning
// store's overall success rate — and, once `evaluation_window` samples have
// accumulated for a tunable, decides whether the last step helped. If the
// rolling average improved by at least `epsilon` the loop keeps climbing in
// the same direction; otherwise it reverses. Per-tunable climb state is
// persisted to the state store so a restart resumes the climb instead of
// re-exploring from scratch.
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::context::CoreContext;
use crate::error::CoreError;
use crate::learning_store::LearningType;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClimbState {
    direction: f64,
    baseline: f64,
    samples: Vec<f64>,
}

impl Default for ClimbState {
    fn default() -> Self {
        Self { direction: 1.0, baseline: 0.0, samples: Vec::new() }
    }
}

fn param_key(tunable: &str) -> String {
    format!("self_tuning_state_{tunable}")
}

fn load_state(ctx: &CoreContext, tunable: &str) -> ClimbState {
    ctx.state_store
        .get_param(&param_key(tunable))
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn save_state(ctx: &CoreContext, tunable: &str, state: &ClimbState) -> Result<(), CoreError> {
    ctx.state_store.set_param(param_key(tunable), serde_json::to_value(state)?)
}

fn current_success_rate(ctx: &CoreContext) -> f64 {
    let stats = ctx.learning_store.stats();
    let total = stats.successful_applications + stats.failed_applications;
    if total == 0 {
        0.5
    } else {
        stats.successful_applications as f64 / total as f64
    }
}

pub struct SelfTuningLoop {
    ctx: CoreContext,
    tick_interval: Duration,
    epsilon: f64,
    evaluation_window: usize,
}

impl SelfTuningLoop {
    pub fn new(ctx: CoreContext, tick_interval: Duration, epsilon: f64, evaluation_window: usize) -> Self {
        Self { ctx, tick_interval, epsilon, evaluation_window: evaluation_window.max(1) }
    }

    fn tick(&self) -> Result<(), CoreError> {
        let metric = current_success_rate(&self.ctx);
        let tunable_names: Vec<String> = self.ctx.config.read().tunables.keys().cloned().collect();

        for name in tunable_names {
            let mut state = load_state(&self.ctx, &name);
            state.samples.push(metric);
            if state.samples.len() < self.evaluation_window {
                save_state(&self.ctx, &name, &state)?;
                continue;
            }

            let avg = state.samples.iter().sum::<f64>() / state.samples.len() as f64;
            let improved = avg - state.baseline >= self.epsilon;
            if !improved {
                state.direction = -state.direction;
            }
            state.baseline = avg;
            state.samples.clear();

            let mut cfg = self.ctx.config.write();
            if let Some(tunable) = cfg.tunables.get_mut(&name) {
                let proposed = (tunable.value + state.direction * tunable.step).clamp(tunable.min, tunable.max);
                let old_value = tunable.value;
                tunable.value = proposed;
                drop(cfg);

                info!(tunable = %name, old_value, new_value = proposed, avg, "self-tuning step applied");
                self.ctx.save_config()?;
                self.ctx.learning_store.add_learning(
                    "self_tuning",
                    LearningType::Optimization,
                    format!("adjusted {name} from {old_value} to {proposed}"),
                    serde_json::json!({ "tunable": name, "avg_success_rate": avg }),
                    if improved { 0.7 } else { 0.4 },
                )?;
            }

            save_state(&self.ctx, &name, &state)?;
        }
        Ok(())
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), CoreError> {
        info!("self-tuning loop started");
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => {
                    self.tick()?;
                }
            }
        }
    }
}
