use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable holding the comma-joined broker list
pub const BOOTSTRAP_SERVERS_ENV: &str = "KAFKA_BOOTSTRAP_SERVERS";

/// Environment variable enabling verbose client diagnostics
pub const DEBUG_ENV: &str = "KAFKA_DEBUG";

/// Broker list used when nothing is configured
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Client configuration shared by the producer connection and every consumer
/// created through the same client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Comma-joined `host:port` list
    pub bootstrap_servers: String,

    /// Client ID for identification; generated when absent
    pub client_id: Option<String>,

    /// Enable librdkafka debug contexts and debug-level logs
    pub debug: bool,

    /// Upper bound on a single producer connection attempt
    pub connect_timeout_ms: u64,

    /// Broker request timeout
    pub request_timeout_ms: u64,

    /// Idle connections are closed after this long
    pub connections_max_idle_ms: u64,

    /// Initial reconnect backoff
    pub reconnect_backoff_ms: u64,

    /// Reconnect backoff cap
    pub reconnect_backoff_max_ms: u64,

    /// How long `send` waits for the broker acknowledgment
    pub ack_timeout_ms: u64,

    /// Reconnect policy applied by `send` on connectivity failures
    pub reconnect: ReconnectPolicy,

    /// Defaults for consumers created by this client
    pub consumer: ConsumerConfig,
}

/// Governs the reinitialization a failing `send` may perform.
///
/// A failing send costs at most `ack_timeout + reinit_timeout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Reinitialize once after a connectivity failure
    pub reinit_on_failure: bool,

    /// Upper bound on the reinitialization performed inside `send`
    pub reinit_timeout_ms: u64,
}

/// Where a consumer with no committed offset starts reading
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Replay all retained history
    #[default]
    Earliest,
    /// Only messages produced from now on
    Latest,
}

impl StartOffset {
    /// Value of the `auto.offset.reset` broker setting
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

impl std::str::FromStr for StartOffset {
    type Err = crate::error::ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(StartOffset::Earliest),
            "latest" => Ok(StartOffset::Latest),
            other => Err(crate::error::ClientError::InvalidConfig(format!(
                "unknown start offset policy: {}",
                other
            ))),
        }
    }
}

/// Consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Broker request timeout
    pub request_timeout_ms: u64,

    /// Group session timeout
    pub session_timeout_ms: u64,

    /// Group heartbeat interval
    pub heartbeat_interval_ms: u64,

    /// Idle connections are closed after this long
    pub connections_max_idle_ms: u64,

    /// Initial reconnect backoff
    pub reconnect_backoff_ms: u64,

    /// Reconnect backoff cap
    pub reconnect_backoff_max_ms: u64,

    /// Offset policy used when the caller does not pick one
    pub start_offset: StartOffset,

    /// Bound on a single poll inside the background runner; cancellation is
    /// observed between polls
    pub poll_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            client_id: None,
            debug: false,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            connections_max_idle_ms: 10_000,
            reconnect_backoff_ms: 1_000,
            reconnect_backoff_max_ms: 5_000,
            ack_timeout_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            reinit_on_failure: true,
            reinit_timeout_ms: 5_000,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            session_timeout_ms: 10_000,
            heartbeat_interval_ms: 3_000,
            connections_max_idle_ms: 10_000,
            reconnect_backoff_ms: 1_000,
            reconnect_backoff_max_ms: 5_000,
            start_offset: StartOffset::Earliest,
            poll_timeout_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `KAFKA_BOOTSTRAP_SERVERS` and `KAFKA_DEBUG`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from the process environment
    pub fn apply_env(&mut self) {
        if let Ok(servers) = std::env::var(BOOTSTRAP_SERVERS_ENV) {
            if !servers.trim().is_empty() {
                self.bootstrap_servers = servers;
            }
        }
        if let Ok(debug) = std::env::var(DEBUG_ENV) {
            self.debug = parse_flag(&debug);
        }
    }

    /// Set the broker list
    pub fn with_bootstrap_servers<T: Into<String>>(mut self, servers: T) -> Self {
        self.bootstrap_servers = servers.into();
        self
    }

    /// Individual broker addresses
    pub fn brokers(&self) -> Vec<&str> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reinit_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect.reinit_timeout_ms)
    }

    /// Worst-case latency of a single failing `send`
    pub fn max_send_latency(&self) -> Duration {
        if self.reconnect.reinit_on_failure {
            self.ack_timeout() + self.reinit_timeout()
        } else {
            self.ack_timeout()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.brokers().is_empty() {
            return Err(crate::ClientError::InvalidConfig(
                "bootstrap_servers must name at least one broker".to_string(),
            ));
        }

        if self.ack_timeout_ms == 0 {
            return Err(crate::ClientError::InvalidConfig(
                "ack_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(crate::ClientError::InvalidConfig(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect_backoff_ms > self.reconnect_backoff_max_ms {
            return Err(crate::ClientError::InvalidConfig(
                "reconnect_backoff_ms must not exceed reconnect_backoff_max_ms".to_string(),
            ));
        }

        self.consumer.validate()
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.heartbeat_interval_ms >= self.session_timeout_ms {
            return Err(crate::ClientError::InvalidConfig(
                "consumer.heartbeat_interval_ms must be lower than consumer.session_timeout_ms"
                    .to_string(),
            ));
        }

        if self.poll_timeout_ms == 0 {
            return Err(crate::ClientError::InvalidConfig(
                "consumer.poll_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.reconnect_backoff_ms > self.reconnect_backoff_max_ms {
            return Err(crate::ClientError::InvalidConfig(
                "consumer.reconnect_backoff_ms must not exceed consumer.reconnect_backoff_max_ms"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

/// `true`, `1`, `yes` and `on` (any case) enable a flag
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
