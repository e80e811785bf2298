use std::time::Duration;

/// Wait between a failure and the next connect attempt.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Interval at which the liveness watcher polls the connection.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the keep-alive subscriber.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Broker endpoint (e.g., "nats://localhost:4222").
    pub endpoint: String,

    /// Subject the service answers on (e.g., "service-example").
    pub subject: String,

    /// Fixed delay applied after every failure before retrying.
    pub settle_delay: Duration,

    /// How often the liveness watcher checks the connection.
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            endpoint: "nats://localhost:4222".to_string(),
            subject: "service-example".to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SupervisorConfig {
    /// Create a new config for the given endpoint and subject.
    pub fn new(endpoint: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the liveness poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
