//! Count-based circuit breaker.
//!
//! ```text
//!   CLOSED ──failure rate ≥ threshold──▶ OPEN
//!     ▲                                   │
//!     │ probe succeeds      open_duration │ elapsed
//!     │                                   ▼
//!     └─────────────────────────────── HALF_OPEN
//!                 probe fails ──▶ OPEN (openedAt restamped)
//! ```
//!
//! The failure rate is computed over the last `window_size` recorded outcomes
//! once at least `minimum_calls` of them are present. Outcomes reported while
//! the circuit is open (late results of calls admitted earlier) are ignored.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use super::CircuitConfig;
use crate::{
    time::format_utc,
    types::{CircuitBreakerState, CircuitStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

#[derive(Debug)]
struct BreakerState {
    status: CircuitStatus,
    window: VecDeque<Outcome>,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    half_open_admitted: u32,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            window: VecDeque::new(),
            opened_at: None,
            opened_at_utc: None,
            half_open_admitted: 0,
        }
    }

    fn failures(&self) -> u32 {
        self.window.iter().filter(|o| **o == Outcome::Failure).count() as u32
    }

    fn successes(&self) -> u32 {
        self.window.len() as u32 - self.failures()
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            f64::from(self.failures()) / self.window.len() as f64
        }
    }
}

/// One named circuit. Every transition happens under the internal lock, so a
/// breaker can be shared by all partition workers.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config: config.normalized(),
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Decides whether the next call may go through. Moves an expired open
    /// circuit to half-open and counts admitted probes.
    pub async fn allow(&self) -> bool {
        let mut state = self.state.lock().await;

        if state.status == CircuitStatus::Open {
            let waited = state
                .opened_at
                .is_none_or(|opened_at| opened_at.elapsed() >= self.config.open_duration);
            if !waited {
                return false;
            }
            self.transition_to_half_open(&mut state);
        }

        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::HalfOpen => {
                if state.half_open_admitted < self.config.half_open_max_calls {
                    state.half_open_admitted += 1;
                    true
                } else {
                    false
                }
            }
            CircuitStatus::Open => false,
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;

        match state.status {
            CircuitStatus::Closed => self.push(&mut state, Outcome::Success),
            CircuitStatus::HalfOpen => self.transition_to_closed(&mut state),
            CircuitStatus::Open => {
                debug!(circuit = %self.name, "ignoring success reported while open");
            }
        }
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;

        match state.status {
            CircuitStatus::Closed => {
                self.push(&mut state, Outcome::Failure);
                if self.should_open(&state) {
                    self.transition_to_open(&mut state);
                }
            }
            CircuitStatus::HalfOpen => self.transition_to_open(&mut state),
            CircuitStatus::Open => {
                debug!(circuit = %self.name, "ignoring failure reported while open");
            }
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerState {
        let state = self.state.lock().await;
        CircuitBreakerState {
            name: self.name.clone(),
            state: state.status,
            failure_count: state.failures(),
            success_count: state.successes(),
            opened_at: state.opened_at_utc.map(format_utc),
        }
    }

    fn push(&self, state: &mut BreakerState, outcome: Outcome) {
        state.window.push_back(outcome);
        while state.window.len() > self.config.window_size as usize {
            state.window.pop_front();
        }
    }

    fn should_open(&self, state: &BreakerState) -> bool {
        state.window.len() >= self.config.minimum_calls as usize
            && state.failure_rate() >= self.config.failure_rate_threshold
    }

    fn transition_to_open(&self, state: &mut BreakerState) {
        warn!(
            circuit = %self.name,
            from = ?state.status,
            failures = state.failures(),
            calls = state.window.len(),
            rate = state.failure_rate(),
            "circuit opening"
        );

        state.status = CircuitStatus::Open;
        state.opened_at = Some(Instant::now());
        state.opened_at_utc = Some(Utc::now());
        state.window.clear();
        state.half_open_admitted = 0;
    }

    fn transition_to_half_open(&self, state: &mut BreakerState) {
        info!(circuit = %self.name, "circuit half-open, admitting probe");

        state.status = CircuitStatus::HalfOpen;
        state.half_open_admitted = 0;
    }

    fn transition_to_closed(&self, state: &mut BreakerState) {
        info!(circuit = %self.name, "circuit closed, downstream recovered");

        state.status = CircuitStatus::Closed;
        state.window.clear();
        state.opened_at = None;
        state.opened_at_utc = None;
        state.half_open_admitted = 0;
    }
}

/// Breakers by circuit name, each built from its own static configuration or
/// the registry default.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitConfig,
    configs: BTreeMap<String, CircuitConfig>,
    breakers: Mutex<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitConfig) -> Self {
        Self {
            default_config,
            configs: BTreeMap::new(),
            breakers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_circuit(mut self, name: impl Into<String>, config: CircuitConfig) -> Self {
        self.configs.insert(name.into(), config);
        self
    }

    /// Returns the shared breaker for `name`, creating it on first use.
    pub async fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }

        let config = self
            .configs
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        let breaker = Arc::new(CircuitBreaker::new(name, config));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub async fn snapshots(&self) -> Vec<CircuitBreakerState> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.lock().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots
    }
}
