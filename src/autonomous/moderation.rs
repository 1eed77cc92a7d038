// =============================================================================
// Moderation loop — escalating actions over a sliding per-actor window
// =============================================================================
//
// Consumes `ContentReceived` events, scores each against the AI router's
// moderation task type, and escalates log -> warn -> mute -> ban as an
// actor accumulates violations within `window_s`. State is per-actor and
// lives in the state store's param table (`moderation_actor_<id>`), so a
// restart resumes the sliding window instead of forgiving every actor.
// =============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ai_router::{AiRouter, TaskType};
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::event_bus::{BackpressurePolicy, Message, MessageType, Priority, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModerationAction {
    Log,
    Warn,
    Mute,
    Ban,
}

impl ModerationAction {
    fn from_strikes(strikes: u32) -> Self {
        match strikes {
            0 | 1 => Self::Log,
            2 => Self::Warn,
            3 => Self::Mute,
            _ => Self::Ban,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActorWindow {
    strikes: u32,
    last_violation_at: DateTime<Utc>,
    last_action: ModerationAction,
}

fn param_key(actor: &str) -> String {
    format!("moderation_actor_{actor}")
}

fn load_window(ctx: &CoreContext, actor: &str) -> Option<ActorWindow> {
    ctx.state_store
        .get_param(&param_key(actor))
        .and_then(|v| serde_json::from_value(v).ok())
}

fn save_window(ctx: &CoreContext, actor: &str, window: &ActorWindow) -> Result<(), CoreError> {
    ctx.state_store
        .set_param(param_key(actor), serde_json::to_value(window)?)
}

/// Treat the provider's reply text as a toxicity probability in `[0, 1]`.
/// A non-numeric reply is treated as "not flagged" rather than failing the
/// loop — moderation degrades to pass-through on a malformed provider reply.
fn is_flagged(reply_text: &str, threshold: f64) -> bool {
    reply_text.trim().parse::<f64>().map(|score| score >= threshold).unwrap_or(false)
}

pub struct ModerationLoop {
    ctx: CoreContext,
    ai_router: std::sync::Arc<AiRouter>,
    window: Duration,
    flag_threshold: f64,
}

impl ModerationLoop {
    pub fn new(ctx: CoreContext, ai_router: std::sync::Arc<AiRouter>, window: Duration, flag_threshold: f64) -> Self {
        Self { ctx, ai_router, window, flag_threshold }
    }

    async fn handle_content(&self, actor: &str, text: &str) -> Result<(), CoreError> {
        let reply = match self.ai_router.query(text, TaskType::Moderation).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(actor, error = %e, "moderation scoring unavailable, passing content through");
                return Ok(());
            }
        };

        if !is_flagged(&reply.text, self.flag_threshold) {
            return Ok(());
        }

        let now = Utc::now();
        let mut window = load_window(&self.ctx, actor).unwrap_or(ActorWindow {
            strikes: 0,
            last_violation_at: now,
            last_action: ModerationAction::Log,
        });

        let elapsed = now
            .signed_duration_since(window.last_violation_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if elapsed > self.window {
            window.strikes = 0;
        }

        window.strikes += 1;
        window.last_violation_at = now;
        window.last_action = ModerationAction::from_strikes(window.strikes);
        save_window(&self.ctx, actor, &window)?;

        warn!(actor, strikes = window.strikes, action = ?window.last_action, "moderation action escalated");

        self.ctx
            .event_bus
            .publish(Message::new(
                MessageType::ModerationAction,
                "moderation_loop",
                Priority::High,
                serde_json::json!({ "actor": actor, "action": window.last_action, "strikes": window.strikes }),
            ))
            .await;

        Ok(())
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), CoreError> {
        let (_handle, mut rx) = self.ctx.event_bus.subscribe(Subscription {
            subscriber: "moderation_loop".to_string(),
            types: [MessageType::ContentReceived].into_iter().collect(),
            policy: BackpressurePolicy::Drop,
            queue_capacity: 256,
            filter_predicate: None,
        });

        info!("moderation loop started");
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
                maybe_msg = rx.recv() => {
                    let Some(msg) = maybe_msg else { return Ok(()) };
                    let actor = msg.data.get("actor").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
                    let text = msg.data.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    if let Err(e) = self.handle_content(&actor, &text).await {
                        warn!(error = %e, "moderation handling failed for one message");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::learning_store::LearningStore;
    use crate::lock_manager::LockManager;
    use crate::state_store::StateStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct AlwaysFlag;
    #[async_trait]
    impl crate::ai_router::LlmProvider for AlwaysFlag {
        fn name(&self) -> &str {
            "always_flag"
        }
        fn supported_task_types(&self) -> &[TaskType] {
            &[TaskType::Moderation]
        }
        fn cost_per_1k(&self) -> f64 {
            0.0
        }
        async fn call(&self, _prompt: &str, _t: TaskType) -> Result<crate::ai_router::ProviderReply, CoreError> {
            Ok(crate::ai_router::ProviderReply {
                text: "0.99".to_string(),
                model_used: "always_flag".to_string(),
                latency_ms: 1,
                cost_estimate: 0.0,
            })
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    fn context() -> (tempfile::TempDir, CoreContext) {
        let dir = tempfile::tempdir().unwrap();
        let state_store = Arc::new(StateStore::open(dir.path().join("state")).unwrap());
        let lock_manager = Arc::new(LockManager::new(dir.path().join("locks"), Duration::from_secs(60)));
        let event_bus = Arc::new(EventBus::new());
        let learning_store = Arc::new(LearningStore::open(dir.path().join("learnings.log"), 0.7).unwrap());
        let ctx = CoreContext::new(
            crate::config::RuntimeConfig::default(),
            state_store,
            lock_manager,
            event_bus,
            learning_store,
            dir.path().join("config.json"),
        );
        (dir, ctx)
    }

    #[tokio::test]
    async fn strikes_escalate_from_log_to_ban() {
        let (_dir, ctx) = context();
        let mut router = AiRouter::new();
        router.register(Arc::new(AlwaysFlag));
        let router = Arc::new(router);
        let ml = ModerationLoop::new(ctx.clone(), router, Duration::from_secs(3600), 0.5);

        for _ in 0..4 {
            ml.handle_content("actor-1", "bad text").await.unwrap();
        }
        let window = load_window(&ctx, "actor-1").unwrap();
        assert_eq!(window.strikes, 4);
        assert_eq!(window.last_action, ModerationAction::Ban);
    }

    #[tokio::test]
    async fn window_expiry_resets_strikes() {
        let (_dir, ctx) = context();
        let mut router = AiRouter::new();
        router.register(Arc::new(AlwaysFlag));
        let router = Arc::new(router);
        let ml = ModerationLoop::new(ctx.clone(), router, Duration::from_secs(0), 0.5);

        ml.handle_content("actor-1", "bad").await.unwrap();
        ml.handle_content("actor-1", "bad").await.unwrap();
        let window = load_window(&ctx, "actor-1").unwrap();
        assert_eq!(window.strikes, 1);
    }

    #[test]
    fn non_numeric_reply_is_not_flagged() {
        assert!(!is_flagged("not a number", 0.5));
    }
}
