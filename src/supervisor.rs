// =============================================================================
// Supervisor (C8) — component registration, DAG start order, backoff restart
// =============================================================================
//
// Generalizes the per-stream supervised-loop pattern used for every market
// data feed: `loop { run_stream().await; sleep(backoff).await }`. Here the
// backoff grows exponentially per component, consecutive failures reset
// after a component stays healthy for `reset_window_s`, and a component
// that keeps failing past `max_consecutive_failures` is marked Fatal and
// never restarted again.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::event_bus::{EventBus, Message, MessageType, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Registered,
    Starting,
    Running,
    Backoff,
    Stopped,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub max_consecutive_failures: u32,
    pub reset_window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_consecutive_failures: 5,
            reset_window: Duration::from_secs(120),
        }
    }
}

pub type WorkerFuture = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send>>;
pub type WorkerFactory = Arc<dyn Fn(watch::Receiver<bool>) -> WorkerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

pub type HealthFuture = Pin<Box<dyn Future<Output = Health> + Send>>;
pub type HealthCheck = Arc<dyn Fn() -> HealthFuture + Send + Sync>;

pub struct ComponentSpec {
    pub name: String,
    pub factory: WorkerFactory,
    pub restart_policy: RestartPolicy,
    pub dependencies: HashSet<String>,
    /// Liveness probe distinct from the worker future exiting: polled on
    /// `health_poll_interval` while the worker runs. `None` disables polling
    /// for this component.
    pub health: Option<HealthCheck>,
    pub health_poll_interval: Duration,
    /// Sustained `Unhealthy` for at least this long counts as a failure,
    /// equivalent to the worker future returning `Err`.
    pub health_unhealthy_after: Duration,
}

struct Runtime {
    state: ComponentState,
    consecutive_failures: u32,
    handle: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ComponentState>,
}

/// Owns the lifecycle of every registered component: resolves a DAG start
/// order from declared dependencies, starts each with exponential-backoff
/// restart on failure, and coordinates a graceful, bounded-deadline shutdown.
pub struct Supervisor {
    specs: Vec<ComponentSpec>,
    runtimes: std::sync::Mutex<HashMap<String, Runtime>>,
    event_bus: Arc<EventBus>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    grace_period: Duration,
}

impl Supervisor {
    pub fn new(event_bus: Arc<EventBus>, grace_period: Duration) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            specs: Vec::new(),
            runtimes: std::sync::Mutex::new(HashMap::new()),
            event_bus,
            shutdown_tx: tx,
            shutdown_rx: rx,
            grace_period,
        }
    }

    pub fn register(&mut self, spec: ComponentSpec) {
        let (state_tx, _rx) = watch::channel(ComponentState::Registered);
        self.runtimes.lock().unwrap().insert(
            spec.name.clone(),
            Runtime { state: ComponentState::Registered, consecutive_failures: 0, handle: None, state_tx },
        );
        self.specs.push(spec);
    }

    /// Resolve a topological start order from declared dependencies. Returns
    /// a `Contract` error if the dependency graph has a cycle.
    fn topological_order(&self) -> Result<Vec<usize>, CoreError> {
        let mut order = Vec::new();
        let mut visited: HashMap<&str, u8> = HashMap::new(); // 0=unvisited,1=visiting,2=done
        let by_name: HashMap<&str, usize> =
            self.specs.iter().enumerate().map(|(i, s)| (s.name.as_str(), i)).collect();

        fn visit<'a>(
            idx: usize,
            specs: &'a [ComponentSpec],
            by_name: &HashMap<&'a str, usize>,
            visited: &mut HashMap<&'a str, u8>,
            order: &mut Vec<usize>,
        ) -> Result<(), CoreError> {
            let name = specs[idx].name.as_str();
            match visited.get(name) {
                Some(2) => return Ok(()),
                Some(1) => return Err(CoreError::contract(format!("dependency cycle detected at {name}"))),
                _ => {}
            }
            visited.insert(name, 1);
            for dep in &specs[idx].dependencies {
                let dep_idx = *by_name
                    .get(dep.as_str())
                    .ok_or_else(|| CoreError::contract(format!("unknown dependency {dep} for {name}")))?;
                visit(dep_idx, specs, by_name, visited, order)?;
            }
            visited.insert(name, 2);
            order.push(idx);
            Ok(())
        }

        for i in 0..self.specs.len() {
            visit(i, &self.specs, &by_name, &mut visited, &mut order)?;
        }
        Ok(order)
    }

    fn set_state(&self, name: &str, state: ComponentState) {
        if let Some(rt) = self.runtimes.lock().unwrap().get_mut(name) {
            rt.state = state;
            let _ = rt.state_tx.send(state);
        }
    }

    pub fn state_of(&self, name: &str) -> Option<ComponentState> {
        self.runtimes.lock().unwrap().get(name).map(|r| r.state)
    }

    fn state_receiver(&self, name: &str) -> Option<watch::Receiver<ComponentState>> {
        self.runtimes.lock().unwrap().get(name).map(|r| r.state_tx.subscribe())
    }

    pub fn component_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn any_fatal(&self) -> bool {
        self.runtimes.lock().unwrap().values().any(|r| r.state == ComponentState::Fatal)
    }

    /// Start every registered component in dependency order, each running
    /// under its own supervised restart loop.
    pub async fn start_all(self: &Arc<Self>) -> Result<(), CoreError> {
        let order = self.topological_order()?;
        for idx in order {
            self.spawn_supervised(idx);
        }
        Ok(())
    }

    fn spawn_supervised(self: &Arc<Self>, idx: usize) {
        let this = Arc::clone(self);
        let name = this.specs[idx].name.clone();
        let factory = this.specs[idx].factory.clone();
        let policy = this.specs[idx].restart_policy.clone();
        let health = this.specs[idx].health.clone();
        let health_poll_interval = this.specs[idx].health_poll_interval;
        let health_unhealthy_after = this.specs[idx].health_unhealthy_after;
        let dep_receivers: Vec<(String, watch::Receiver<ComponentState>)> = this.specs[idx]
            .dependencies
            .iter()
            .filter_map(|dep| this.state_receiver(dep).map(|rx| (dep.clone(), rx)))
            .collect();
        let shutdown_rx = this.shutdown_rx.clone();

        this.set_state(&name, ComponentState::Starting);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let name = task_name;
            for (dep_name, mut dep_rx) in dep_receivers {
                loop {
                    match *dep_rx.borrow() {
                        ComponentState::Running => break,
                        ComponentState::Fatal => {
                            error!(component = %name, dependency = %dep_name, "dependency reached Fatal before starting");
                            this.set_state(&name, ComponentState::Fatal);
                            return;
                        }
                        _ => {}
                    }
                    let mut shutdown_rx_watch = shutdown_rx.clone();
                    tokio::select! {
                        _ = dep_rx.changed() => {}
                        _ = shutdown_rx_watch.changed() => {
                            if *shutdown_rx.borrow() {
                                this.set_state(&name, ComponentState::Stopped);
                                return;
                            }
                        }
                    }
                }
            }

            loop {
                if *shutdown_rx.borrow() {
                    this.set_state(&name, ComponentState::Stopped);
                    return;
                }

                this.set_state(&name, ComponentState::Running);
                let started_at = tokio::time::Instant::now();
                let worker_future = (factory)(shutdown_rx.clone());
                let result = tokio::select! {
                    r = worker_future => r,
                    _ = health_failure_watch(&health, health_poll_interval, health_unhealthy_after) => {
                        Err(CoreError::transient(format!("{name} sustained Unhealthy past threshold")))
                    }
                };

                if *shutdown_rx.borrow() {
                    this.set_state(&name, ComponentState::Stopped);
                    return;
                }

                let ran_long_enough = started_at.elapsed() >= policy.reset_window;
                let failures = {
                    let mut runtimes = this.runtimes.lock().unwrap();
                    let rt = runtimes.get_mut(&name).expect("registered");
                    if ran_long_enough {
                        rt.consecutive_failures = 0;
                    }
                    match &result {
                        Ok(()) => rt.consecutive_failures,
                        Err(_) => {
                            rt.consecutive_failures += 1;
                            rt.consecutive_failures
                        }
                    }
                };

                if let Err(e) = &result {
                    warn!(component = %name, error = %e, failures, "component exited with error");
                } else {
                    info!(component = %name, "component exited cleanly");
                }

                if failures >= policy.max_consecutive_failures {
                    this.set_state(&name, ComponentState::Fatal);
                    error!(component = %name, failures, "component marked Fatal, will not restart");
                    this.event_bus
                        .publish(Message::new(
                            MessageType::ComponentAlert,
                            "supervisor",
                            Priority::Critical,
                            serde_json::json!({ "component": name, "state": "Fatal" }),
                        ))
                        .await;
                    return;
                }

                this.set_state(&name, ComponentState::Backoff);
                let exp = policy.min_backoff.as_secs_f64() * 2f64.powi((failures.max(1) - 1) as i32);
                let capped = exp.min(policy.max_backoff.as_secs_f64());
                let jitter: f64 = rand::rng().random_range(0.0..=capped * 0.25);
                let delay = Duration::from_secs_f64(capped + jitter);
                info!(component = %name, delay_s = delay.as_secs_f64(), "scheduling restart");

                let mut shutdown_rx_watch = shutdown_rx.clone();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx_watch.changed() => {
                        if *shutdown_rx.borrow() {
                            this.set_state(&name, ComponentState::Stopped);
                            return;
                        }
                    }
                }
            }
        });

        let mut runtimes = self.runtimes.lock().unwrap();
        if let Some(rt) = runtimes.get_mut(&name) {
            rt.handle = Some(handle);
        }
    }

    /// Broadcast a shutdown signal, wait up to `grace_period` for every
    /// worker to exit, then return (does not forcibly kill tasks beyond
    /// that, since `tokio` tasks are cooperative).
    pub async fn shutdown(&self) {
        warn!("supervisor shutdown requested");
        let _ = self.shutdown_tx.send(true);
        self.event_bus.shutdown().await;

        let handles: Vec<JoinHandle<()>> = {
            let mut runtimes = self.runtimes.lock().unwrap();
            runtimes.values_mut().filter_map(|r| r.handle.take()).collect()
        };

        let _ = tokio::time::timeout(self.grace_period, futures_join_all(handles)).await;
        info!("supervisor shutdown complete");
    }
}

async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for h in handles {
        let _ = h.await;
    }
}

/// Resolves once a component's health has been `Unhealthy` continuously for
/// `unhealthy_after`. A component with no `health` check never resolves, so
/// racing it via `select!` against a worker future is a no-op for those.
async fn health_failure_watch(health: &Option<HealthCheck>, poll_interval: Duration, unhealthy_after: Duration) {
    let Some(check) = health else {
        return std::future::pending().await;
    };

    let mut unhealthy_since: Option<tokio::time::Instant> = None;
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        match (check)().await {
            Health::Healthy => unhealthy_since = None,
            Health::Unhealthy => {
                let since = *unhealthy_since.get_or_insert_with(tokio::time::Instant::now);
                if since.elapsed() >= unhealthy_after {
                    return;
                }
            }
        }
    }
}
