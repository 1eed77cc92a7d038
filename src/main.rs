// =============================================================================
// Aegis Core — Main Entry Point
// =============================================================================
//
// Starts every component through the supervisor: the trade engine and AI
// router are shared handles invoked reactively by workers, while the lock
// reaper, AI router health loop, and the three autonomous loops run as
// supervised background tasks. Trading starts disabled (`trading_enabled:
// false` is the config default) until an operator flips it explicitly.
// =============================================================================

mod ai_router;
mod autonomous;
mod circuit_breaker;
mod config;
mod context;
mod error;
mod event_bus;
mod learning_store;
mod lock_manager;
mod secrets;
mod state_store;
mod supervisor;
mod trade_engine;
mod venue;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::ai_router::AiRouter;
use crate::autonomous::moderation::ModerationLoop;
use crate::autonomous::regime_adapter::RegimeAdapter;
use crate::autonomous::self_tuning::SelfTuningLoop;
use crate::config::RuntimeConfig;
use crate::context::CoreContext;
use crate::event_bus::EventBus;
use crate::learning_store::LearningStore;
use crate::lock_manager::LockManager;
use crate::secrets::{EnvSecretProvider, SecretProvider};
use crate::state_store::StateStore;
use crate::supervisor::{ComponentSpec, RestartPolicy, Supervisor};
use crate::venue::{DemoVenueAdapter, LiveVenueAdapter, VenueAdapter};

const EXIT_FATAL_INIT: i32 = 1;
const EXIT_CORRUPT_STATE: i32 = 2;
const EXIT_COMPONENT_FATAL: i32 = 3;

#[tokio::main]
async fn main() {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("aegis-core starting up");

    let state_root = std::env::var("AEGIS_STATE_DIR").unwrap_or_else(|_| "./aegis-state".to_string());
    let config_path = std::env::var("AEGIS_CONFIG_PATH").unwrap_or_else(|_| "runtime_config.json".to_string());

    let config = RuntimeConfig::load(&config_path);
    info!(
        trading_enabled = config.trading_enabled,
        kill_switch = config.kill_switch,
        max_concurrent_positions = config.max_concurrent_positions,
        "runtime config loaded"
    );

    let state_store = match StateStore::open(&state_root) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "refusing to start with unreadable persisted state");
            std::process::exit(EXIT_CORRUPT_STATE);
        }
    };

    let lock_manager = Arc::new(LockManager::new(state_store.locks_dir(), Duration::from_secs(config.lock_ttl_s)));
    let event_bus = Arc::new(EventBus::new());

    let learnings_path = std::path::Path::new(&state_root).join("learnings.log");
    let learning_store = match LearningStore::open(&learnings_path, config.learning_confidence_alpha) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open learning store");
            std::process::exit(EXIT_FATAL_INIT);
        }
    };

    let ctx = CoreContext::new(
        config,
        Arc::clone(&state_store),
        Arc::clone(&lock_manager),
        Arc::clone(&event_bus),
        Arc::clone(&learning_store),
        config_path.clone().into(),
    );

    let venue: Arc<dyn VenueAdapter> = build_venue_adapter();
    let max_positions = ctx.config.read().max_concurrent_positions;
    let trade_engine = Arc::new(
        trade_engine::TradeEngine::new(
            Arc::clone(&state_store),
            Arc::clone(&event_bus),
            Arc::clone(&learning_store),
            venue,
            max_positions,
        )
        .await,
    );
    // held alive here; a deployment wires its own strategy collaborator to
    // open/close/on_price against this handle, the core does not call it itself
    let _trade_engine = trade_engine;

    let ai_router = Arc::new(AiRouter::new());

    let mut supervisor = Supervisor::new(Arc::clone(&event_bus), Duration::from_secs(30));
    register_components(&mut supervisor, ctx.clone(), Arc::clone(&ai_router));
    let supervisor = Arc::new(supervisor);

    if let Err(e) = supervisor.start_all().await {
        error!(error = %e, "supervisor failed to start components");
        std::process::exit(EXIT_FATAL_INIT);
    }

    info!("all components running, press Ctrl+C to stop");

    let watchdog = Arc::clone(&supervisor);
    let watch_for_fatal = async {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        loop {
            ticker.tick().await;
            if watchdog.any_fatal() {
                return;
            }
        }
    };

    let mut exit_code = 0;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if res.is_err() {
                warn!("failed to install ctrl-c handler, shutting down immediately");
            } else {
                warn!("shutdown signal received, stopping gracefully");
            }
        }
        _ = watch_for_fatal => {
            error!("a required component reached Fatal state, shutting down");
            exit_code = EXIT_COMPONENT_FATAL;
        }
    }

    supervisor.shutdown().await;

    if let Err(e) = ctx.save_config() {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("aegis-core shut down complete");
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn build_venue_adapter() -> Arc<dyn VenueAdapter> {
    let live = std::env::var("AEGIS_ACCOUNT_MODE").map(|v| v.eq_ignore_ascii_case("live")).unwrap_or(false);
    if !live {
        info!("starting in Demo account mode");
        return Arc::new(DemoVenueAdapter::new());
    }

    let secrets = EnvSecretProvider;
    let api_key = secrets.get_secret("AEGIS_API_KEY").unwrap_or_default();
    let api_secret = secrets.get_secret("AEGIS_API_SECRET").unwrap_or_default();
    let base_url = std::env::var("AEGIS_VENUE_BASE_URL").unwrap_or_else(|_| "https://api.binance.com".to_string());

    if api_key.is_empty() || api_secret.is_empty() {
        warn!("AEGIS_ACCOUNT_MODE=live but venue credentials are missing, falling back to Demo");
        return Arc::new(DemoVenueAdapter::new());
    }

    info!("starting in Live account mode");
    Arc::new(LiveVenueAdapter::new(api_key, api_secret, base_url))
}

fn register_components(supervisor: &mut Supervisor, ctx: CoreContext, ai_router: Arc<AiRouter>) {
    let lock_ctx = ctx.clone();
    supervisor.register(ComponentSpec {
        name: "lock_reaper".to_string(),
        factory: Arc::new(move |mut shutdown_rx| {
            let ctx = lock_ctx.clone();
            Box::pin(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() { return Ok(()); }
                        }
                        _ = ticker.tick() => {
                            if let Ok(n) = ctx.lock_manager.reap_expired() {
                                if n > 0 {
                                    info!(reaped = n, "expired locks reaped");
                                }
                            }
                        }
                    }
                }
            })
        }),
        restart_policy: RestartPolicy::default(),
        dependencies: HashSet::new(),
        health: None,
        health_poll_interval: Duration::from_secs(30),
        health_unhealthy_after: Duration::from_secs(60),
    });

    let heartbeat_ctx = ctx.clone();
    supervisor.register(ComponentSpec {
        name: "lock_heartbeat".to_string(),
        factory: Arc::new(move |mut shutdown_rx| {
            let ctx = heartbeat_ctx.clone();
            Box::pin(async move {
                let interval = ctx.lock_manager.ttl() / 3;
                let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() { return Ok(()); }
                        }
                        _ = ticker.tick() => {
                            for (resource_key, outcome) in ctx.lock_manager.renew_all() {
                                if outcome == crate::lock_manager::RenewOutcome::Lost {
                                    warn!(resource_key, "held lock lost before heartbeat could renew it");
                                }
                            }
                        }
                    }
                }
            })
        }),
        restart_policy: RestartPolicy::default(),
        dependencies: HashSet::new(),
        health: None,
        health_poll_interval: Duration::from_secs(30),
        health_unhealthy_after: Duration::from_secs(60),
    });

    let health_router = Arc::clone(&ai_router);
    supervisor.register(ComponentSpec {
        name: "ai_router_health".to_string(),
        factory: Arc::new(move |mut shutdown_rx| {
            let router = Arc::clone(&health_router);
            Box::pin(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() { return Ok(()); }
                        }
                        _ = ticker.tick() => {
                            let _ = router.refresh_health().await;
                        }
                    }
                }
            })
        }),
        restart_policy: RestartPolicy::default(),
        dependencies: HashSet::new(),
        health: None,
        health_poll_interval: Duration::from_secs(30),
        health_unhealthy_after: Duration::from_secs(60),
    });

    let moderation_ctx = ctx.clone();
    let moderation_router = Arc::clone(&ai_router);
    let moderation_health_router = Arc::clone(&ai_router);
    supervisor.register(ComponentSpec {
        name: "moderation_loop".to_string(),
        factory: Arc::new(move |shutdown_rx| {
            let loop_ = ModerationLoop::new(moderation_ctx.clone(), Arc::clone(&moderation_router), Duration::from_secs(600), 0.5);
            Box::pin(loop_.run(shutdown_rx))
        }),
        restart_policy: RestartPolicy::default(),
        dependencies: ["ai_router_health".to_string()].into_iter().collect(),
        health: Some(Arc::new(move || {
            let router = Arc::clone(&moderation_health_router);
            Box::pin(async move {
                let statuses = router.refresh_health().await;
                if statuses.is_empty() || statuses.values().any(|healthy| *healthy) {
                    supervisor::Health::Healthy
                } else {
                    supervisor::Health::Unhealthy
                }
            })
        })),
        health_poll_interval: Duration::from_secs(60),
        health_unhealthy_after: Duration::from_secs(300),
    });

    let tuning_ctx = ctx.clone();
    supervisor.register(ComponentSpec {
        name: "self_tuning_loop".to_string(),
        factory: Arc::new(move |shutdown_rx| {
            let loop_ = SelfTuningLoop::new(tuning_ctx.clone(), Duration::from_secs(300), 0.02, 5);
            Box::pin(loop_.run(shutdown_rx))
        }),
        restart_policy: RestartPolicy::default(),
        dependencies: HashSet::new(),
        health: None,
        health_poll_interval: Duration::from_secs(30),
        health_unhealthy_after: Duration::from_secs(60),
    });

    let regime_ctx = ctx.clone();
    supervisor.register(ComponentSpec {
        name: "regime_adapter".to_string(),
        factory: Arc::new(move |shutdown_rx| {
            let adapter = RegimeAdapter::new(regime_ctx.clone());
            Box::pin(adapter.run(shutdown_rx))
        }),
        restart_policy: RestartPolicy::default(),
        dependencies: HashSet::new(),
        health: None,
        health_poll_interval: Duration::from_secs(30),
        health_unhealthy_after: Duration::from_secs(60),
    });
}
