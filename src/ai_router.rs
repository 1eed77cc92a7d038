// =============================================================================
// AI Router (C6) — task-typed dispatch across LLM providers
// =============================================================================
//
// `LlmProvider` mirrors the async-trait abstraction used elsewhere in the
// pack for pluggable LLM backends: a uniform `call` plus a cheap `health`
// check. The router filters candidates by task-type support and health
// (each provider carries its own circuit breaker), then tries the cheapest
// remaining provider first, falling through to the next on failure.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::circuit_breaker::{Allow, CircuitBreaker};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Sentiment,
    Moderation,
    Summarization,
    Chat,
}

#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub model_used: String,
    pub latency_ms: u64,
    pub cost_estimate: f64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn supported_task_types(&self) -> &[TaskType];
    fn cost_per_1k(&self) -> f64;
    async fn call(&self, prompt: &str, task_type: TaskType) -> Result<ProviderReply, CoreError>;
    async fn health_check(&self) -> bool;
}

struct Registered {
    provider: Arc<dyn LlmProvider>,
    breaker: CircuitBreaker,
}

/// Routes a prompt to the cheapest healthy provider supporting the task
/// type, falling through on failure until providers are exhausted.
pub struct AiRouter {
    providers: Vec<Registered>,
}

impl AiRouter {
    pub fn new() -> Self {
        Self { providers: Vec::new() }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_string();
        self.providers.push(Registered {
            provider,
            breaker: CircuitBreaker::new(
                format!("ai_router::{name}"),
                3,
                std::time::Duration::from_secs(60),
                std::time::Duration::from_secs(30),
            ),
        });
    }

    pub async fn query(&self, prompt: &str, task_type: TaskType) -> Result<ProviderReply, CoreError> {
        let mut candidates: Vec<&Registered> = self
            .providers
            .iter()
            .filter(|r| r.provider.supported_task_types().contains(&task_type))
            .filter(|r| matches!(r.breaker.allow(), Allow::Allowed))
            .collect();

        candidates.sort_by(|a, b| {
            a.provider
                .cost_per_1k()
                .partial_cmp(&b.provider.cost_per_1k())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if candidates.is_empty() {
            return Err(CoreError::external_unavailable("no healthy provider supports this task type"));
        }

        let mut last_err = None;
        for registered in candidates {
            match registered.provider.call(prompt, task_type).await {
                Ok(reply) => {
                    registered.breaker.record_success();
                    info!(provider = registered.provider.name(), model = %reply.model_used, "ai router call succeeded");
                    return Ok(reply);
                }
                Err(e) => {
                    if e.counts_as_failure() {
                        registered.breaker.record_failure(&e.to_string());
                    }
                    warn!(provider = registered.provider.name(), error = %e, "provider call failed, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CoreError::external_unavailable("all providers unavailable")))
    }

    /// Run each registered provider's health check and record the result
    /// against its breaker, without making a billed call.
    pub async fn refresh_health(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for registered in &self.providers {
            let healthy = registered.provider.health_check().await;
            if !healthy {
                registered.breaker.record_failure("health check failed");
            }
            results.insert(registered.provider.name().to_string(), healthy);
        }
        results
    }
}

impl Default for AiRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        name: &'static str,
        cost: f64,
        fail_first_n: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn supported_task_types(&self) -> &[TaskType] {
            &[TaskType::Sentiment]
        }
        fn cost_per_1k(&self) -> f64 {
            self.cost
        }
        async fn call(&self, _prompt: &str, _task_type: TaskType) -> Result<ProviderReply, CoreError> {
            let remaining = self.fail_first_n.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err(CoreError::external_unavailable("simulated outage"));
            }
            Ok(ProviderReply {
                text: "ok".to_string(),
                model_used: self.name.to_string(),
                latency_ms: 5,
                cost_estimate: self.cost,
            })
        }
        async fn health_check(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn picks_cheapest_healthy_provider() {
        let mut router = AiRouter::new();
        router.register(Arc::new(FlakyProvider { name: "expensive", cost: 5.0, fail_first_n: AtomicU32::new(0) }));
        router.register(Arc::new(FlakyProvider { name: "cheap", cost: 1.0, fail_first_n: AtomicU32::new(0) }));

        let reply = router.query("hi", TaskType::Sentiment).await.unwrap();
        assert_eq!(reply.model_used, "cheap");
    }

    #[tokio::test]
    async fn falls_through_to_next_provider_on_failure() {
        let mut router = AiRouter::new();
        router.register(Arc::new(FlakyProvider { name: "cheap", cost: 1.0, fail_first_n: AtomicU32::new(99) }));
        router.register(Arc::new(FlakyProvider { name: "backup", cost: 2.0, fail_first_n: AtomicU32::new(0) }));

        let reply = router.query("hi", TaskType::Sentiment).await.unwrap();
        assert_eq!(reply.model_used, "backup");
    }

    #[tokio::test]
    async fn no_provider_for_task_type_errors() {
        let router = AiRouter::new();
        let err = router.query("hi", TaskType::Moderation).await.unwrap_err();
        assert!(matches!(err, CoreError::ExternalUnavailable { .. }));
    }

    #[tokio::test]
    async fn all_providers_failing_returns_error() {
        let mut router = AiRouter::new();
        router.register(Arc::new(FlakyProvider { name: "a", cost: 1.0, fail_first_n: AtomicU32::new(99) }));
        let err = router.query("hi", TaskType::Sentiment).await.unwrap_err();
        assert!(matches!(err, CoreError::ExternalUnavailable { .. }));
    }
}
