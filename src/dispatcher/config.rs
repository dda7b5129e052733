use std::{str::FromStr, time::Duration};

use crate::channel::{DEFAULT_CONSUMER_GROUP, DEFAULT_PARTITIONS, DEFAULT_TOPIC};

pub const DEFAULT_CIRCUIT_NAME: &str = "webhook-delivery";

/// Static parameters of one named circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitConfig {
    /// Opens once failures / calls in the window reaches this rate.
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes the rate is computed over.
    pub window_size: u32,
    /// Outcomes required in the window before the rate is evaluated.
    pub minimum_calls: u32,
    /// Time spent open before a probe is admitted.
    pub open_duration: Duration,
    /// Probes admitted while half-open.
    pub half_open_max_calls: u32,
}

impl CircuitConfig {
    /// Clamps every field into its usable range.
    pub fn normalized(mut self) -> Self {
        let default = Self::default();
        if !self.failure_rate_threshold.is_finite() || self.failure_rate_threshold <= 0.0 {
            self.failure_rate_threshold = default.failure_rate_threshold;
        }
        self.failure_rate_threshold = self.failure_rate_threshold.min(1.0);
        self.window_size = self.window_size.max(1);
        self.minimum_calls = self.minimum_calls.clamp(1, self.window_size);
        self.half_open_max_calls = self.half_open_max_calls.max(1);
        self
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            window_size: 10,
            minimum_calls: 5,
            open_duration: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub topic: String,
    pub consumer_group: String,
    pub partitions: u32,
    pub poll_interval: Duration,
    pub channel_backoff: Duration,
    pub http_timeout: Duration,
    pub circuit_name: String,
    pub circuit: CircuitConfig,
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("DISPATCHER_TOPIC")
            && !value.trim().is_empty()
        {
            config.topic = value.trim().to_string();
        }
        if let Ok(value) = std::env::var("DISPATCHER_CONSUMER_GROUP")
            && !value.trim().is_empty()
        {
            config.consumer_group = value.trim().to_string();
        }
        if let Some(parsed) = parse_env::<u32>("DISPATCHER_PARTITIONS") {
            config.partitions = parsed.max(1);
        }
        if let Some(parsed) = parse_env::<u64>("DISPATCHER_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(parsed.max(1));
        }
        if let Some(parsed) = parse_env::<u64>("DISPATCHER_CHANNEL_BACKOFF_MS") {
            config.channel_backoff = Duration::from_millis(parsed.max(1));
        }
        if let Some(parsed) = parse_env::<u64>("DISPATCHER_HTTP_TIMEOUT_MS") {
            config.http_timeout = Duration::from_millis(parsed.max(1));
        }
        if let Ok(value) = std::env::var("DISPATCHER_CIRCUIT_NAME")
            && !value.trim().is_empty()
        {
            config.circuit_name = value.trim().to_string();
        }
        if let Some(parsed) = parse_env::<f64>("DISPATCHER_CIRCUIT_FAILURE_RATE") {
            config.circuit.failure_rate_threshold = parsed;
        }
        if let Some(parsed) = parse_env::<u32>("DISPATCHER_CIRCUIT_WINDOW_SIZE") {
            config.circuit.window_size = parsed;
        }
        if let Some(parsed) = parse_env::<u32>("DISPATCHER_CIRCUIT_MINIMUM_CALLS") {
            config.circuit.minimum_calls = parsed;
        }
        if let Some(parsed) = parse_env::<u64>("DISPATCHER_CIRCUIT_OPEN_DURATION_MS") {
            config.circuit.open_duration = Duration::from_millis(parsed);
        }
        if let Some(parsed) = parse_env::<u32>("DISPATCHER_CIRCUIT_HALF_OPEN_PROBES") {
            config.circuit.half_open_max_calls = parsed;
        }

        config.circuit = config.circuit.normalized();
        config
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            partitions: DEFAULT_PARTITIONS,
            poll_interval: Duration::from_millis(250),
            channel_backoff: Duration::from_secs(1),
            http_timeout: Duration::from_secs(10),
            circuit_name: DEFAULT_CIRCUIT_NAME.to_string(),
            circuit: CircuitConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
