// =============================================================================
// Circuit Breaker (C5) — generic failure-counting safety primitive
// =============================================================================
//
// Extracted from the four hand-rolled threshold/window breakers that used to
// live inline in the risk engine: one reusable type, instantiated per
// use-site (trade execution, social posting, each AI provider) instead of
// duplicated fields.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allow {
    Allowed,
    Denied { retry_at: Option<Instant> },
}

struct Inner {
    state: BreakerState,
    failure_times: Vec<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Threshold/window/cooldown circuit breaker. `allow()` must be consulted
/// before the protected operation; `record_success`/`record_failure` report
/// its outcome afterward.
pub struct CircuitBreaker {
    pub name: String,
    threshold: u32,
    window: Duration,
    cooldown: Duration,
    inner: RwLock<Inner>,
    forced_open: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold,
            window,
            cooldown,
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                failure_times: Vec::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
            forced_open: AtomicBool::new(false),
        }
    }

    /// Check whether a call is currently allowed. In `HalfOpen`, exactly one
    /// probe is admitted at a time; concurrent callers are denied until that
    /// probe resolves via `record_success`/`record_failure`.
    pub fn allow(&self) -> Allow {
        if self.forced_open.load(Ordering::SeqCst) {
            return Allow::Denied { retry_at: None };
        }

        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => Allow::Allowed,
            BreakerState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
                if opened_at.elapsed() >= self.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(breaker = %self.name, "cooldown elapsed, admitting one probe");
                    Allow::Allowed
                } else {
                    Allow::Denied { retry_at: Some(opened_at + self.cooldown) }
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Allow::Denied { retry_at: None }
                } else {
                    inner.probe_in_flight = true;
                    Allow::Allowed
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.failure_times.clear();
                inner.opened_at = None;
                inner.probe_in_flight = false;
                info!(breaker = %self.name, "probe succeeded, breaker closed");
            }
            BreakerState::Closed => {
                inner.failure_times.clear();
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self, reason: &str) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(breaker = %self.name, reason, "probe failed, breaker re-opened");
            }
            BreakerState::Closed => {
                let now = Instant::now();
                inner.failure_times.push(now);
                let window = self.window;
                inner.failure_times.retain(|t| now.duration_since(*t) <= window);
                if inner.failure_times.len() as u32 >= self.threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(breaker = %self.name, reason, failures = inner.failure_times.len(), "breaker tripped");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn force_open(&self, reason: &str) {
        self.forced_open.store(true, Ordering::SeqCst);
        warn!(breaker = %self.name, reason, "breaker force-opened by operator");
    }

    pub fn force_close(&self, reason: &str) {
        self.forced_open.store(false, Ordering::SeqCst);
        let mut inner = self.inner.write();
        inner.state = BreakerState::Closed;
        inner.failure_times.clear();
        inner.opened_at = None;
        inner.probe_in_flight = false;
        info!(breaker = %self.name, reason, "breaker force-closed by operator");
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_until_threshold_reached() {
        let cb = CircuitBreaker::new("t", 3, Duration::from_secs(60), Duration::from_secs(1));
        cb.record_failure("x");
        cb.record_failure("x");
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.allow(), Allow::Allowed);

        cb.record_failure("x");
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn open_denies_until_cooldown_elapses() {
        let cb = CircuitBreaker::new("t", 1, Duration::from_secs(60), Duration::from_millis(20));
        cb.record_failure("x");
        assert!(matches!(cb.allow(), Allow::Denied { .. }));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cb.allow(), Allow::Allowed);
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let cb = CircuitBreaker::new("t", 1, Duration::from_secs(60), Duration::from_millis(10));
        cb.record_failure("x");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.allow(), Allow::Allowed);
        assert!(matches!(cb.allow(), Allow::Denied { .. }));
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let cb = CircuitBreaker::new("t", 1, Duration::from_secs(60), Duration::from_millis(10));
        cb.record_failure("x");
        std::thread::sleep(Duration::from_millis(20));
        cb.allow();
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_breaker() {
        let cb = CircuitBreaker::new("t", 1, Duration::from_secs(60), Duration::from_millis(10));
        cb.record_failure("x");
        std::thread::sleep(Duration::from_millis(20));
        cb.allow();
        cb.record_failure("probe failed");
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn force_open_denies_regardless_of_state() {
        let cb = CircuitBreaker::new("t", 5, Duration::from_secs(60), Duration::from_secs(1));
        cb.force_open("operator halt");
        assert!(matches!(cb.allow(), Allow::Denied { .. }));
        cb.force_close("resume");
        assert_eq!(cb.allow(), Allow::Allowed);
    }

    #[test]
    fn failures_outside_window_do_not_accumulate() {
        let cb = CircuitBreaker::new("t", 2, Duration::from_millis(20), Duration::from_secs(1));
        cb.record_failure("x");
        std::thread::sleep(Duration::from_millis(30));
        cb.record_failure("x");
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
