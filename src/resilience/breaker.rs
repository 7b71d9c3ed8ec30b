use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker tunables
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub threshold: u32,
    /// How long an open circuit waits before allowing a trial call
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Health record for one external dependency
#[derive(Debug, Default)]
struct DependencyHealth {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    is_open: bool,
    /// When the outstanding half-open trial call was granted. The circuit
    /// stays open while a trial is pending; a trial whose outcome never gets
    /// recorded (the caller was cancelled mid-flight) goes stale after
    /// `timeout` and a fresh one is granted.
    trial_started_at: Option<Instant>,
}

/// Per-dependency circuit breaker registry.
///
/// One instance is shared by all in-flight requests; the guard check and the
/// outcome recording are serialized behind a single mutex so concurrent
/// callers cannot undercount failures. Construct isolated instances in tests.
pub struct CircuitBreakers {
    config: BreakerConfig,
    state: Mutex<HashMap<String, DependencyHealth>>,
    now_fn: Box<dyn Fn() -> Instant + Send + Sync>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
            now_fn: Box::new(Instant::now),
        }
    }

    /// Replaces the clock, for deterministic timeout tests.
    pub fn with_clock(mut self, now_fn: Box<dyn Fn() -> Instant + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Whether a call to `dependency` may proceed.
    ///
    /// Closed circuits always allow. An open circuit allows exactly one trial
    /// call once `timeout` has elapsed since the last recorded failure; while
    /// that trial is pending all other callers are rejected. If the trial's
    /// outcome is never recorded, it goes stale after another `timeout` and
    /// the next caller gets a fresh trial, so an abandoned trial cannot leave
    /// the dependency permanently unreachable.
    pub fn guard(&self, dependency: &str) -> bool {
        let now = (self.now_fn)();
        let mut state = self.state.lock().unwrap();
        let health = state.entry(dependency.to_string()).or_default();

        if !health.is_open {
            return true;
        }

        if let Some(started) = health.trial_started_at {
            if now.saturating_duration_since(started) < self.config.timeout {
                return false;
            }
            tracing::warn!(dependency = %dependency, "Trial call never resolved, granting a new one");
        }

        let waited = health
            .last_failure_at
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or(Duration::MAX);

        if waited >= self.config.timeout {
            health.trial_started_at = Some(now);
            tracing::info!(dependency = %dependency, "Circuit breaker allowing trial call");
            return true;
        }

        false
    }

    /// Records a successful call; unconditionally heals the circuit.
    pub fn record_success(&self, dependency: &str) {
        let mut state = self.state.lock().unwrap();
        let health = state.entry(dependency.to_string()).or_default();
        health.consecutive_failures = 0;
        health.is_open = false;
        health.trial_started_at = None;
    }

    /// Records a failed call, opening the circuit at the threshold.
    ///
    /// A failed trial call keeps the circuit open and restarts the wait
    /// without needing the threshold to be reached again.
    pub fn record_failure(&self, dependency: &str) {
        let now = (self.now_fn)();
        let mut state = self.state.lock().unwrap();
        let health = state.entry(dependency.to_string()).or_default();
        health.consecutive_failures += 1;
        health.last_failure_at = Some(now);

        if health.is_open {
            if health.trial_started_at.take().is_some() {
                tracing::warn!(dependency = %dependency, "Trial call failed, circuit stays open");
            }
            return;
        }

        if health.consecutive_failures >= self.config.threshold {
            health.is_open = true;
            tracing::warn!(
                dependency = %dependency,
                failures = health.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }

    /// Current consecutive failure count, for logging and tests.
    pub fn failure_count(&self, dependency: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state
            .get(dependency)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
