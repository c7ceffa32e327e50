use activitymq_client::{ClientConfig, StartOffset};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ActivityError;

/// Application configuration, usually loaded from a TOML file.
///
/// ```toml
/// [kafka]
/// bootstrap_servers = "kafka:9092"
///
/// [[consumers]]
/// topic = "user-activity"
/// group_id = "activity-log"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub kafka: ClientConfig,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
    /// Background consumers launched by the service at startup
    pub consumers: Vec<ConsumerSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How long shutdown waits for each runner to stop
    pub shutdown_grace_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ServiceConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSpec {
    pub topic: String,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Falls back to `kafka.consumer.start_offset`
    #[serde(default)]
    pub start_offset: Option<StartOffset>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise, then apply the environment
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.kafka.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration for the command-line tools
    pub fn for_servers(bootstrap_servers: &str) -> Self {
        let mut config = Self::default();
        config.kafka.bootstrap_servers = bootstrap_servers.to_string();
        config
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.kafka
            .validate()
            .map_err(|e| ActivityError::InvalidConfig(e.to_string()))?;

        if self.logging.level.trim().is_empty() {
            return Err(ActivityError::InvalidConfig(
                "logging.level cannot be empty".to_string(),
            ));
        }

        for (index, consumer) in self.consumers.iter().enumerate() {
            if consumer.topic.is_empty() {
                return Err(ActivityError::InvalidConfig(format!(
                    "consumers[{}].topic cannot be empty",
                    index
                )));
            }
            if consumer.group_id.as_deref() == Some("") {
                return Err(ActivityError::InvalidConfig(format!(
                    "consumers[{}].group_id cannot be empty when set",
                    index
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[kafka]
bootstrap_servers = "kafka-1:9092,kafka-2:9092"
ack_timeout_ms = 2000

[kafka.consumer]
start_offset = "latest"

[logging]
level = "debug"

[[consumers]]
topic = "user-activity"
group_id = "activity-log"

[[consumers]]
topic = "notion-events"
start_offset = "earliest"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.kafka.brokers(), vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(config.kafka.ack_timeout_ms, 2000);
        assert_eq!(config.kafka.connect_timeout_ms, 5000);
        assert_eq!(config.kafka.consumer.start_offset, StartOffset::Latest);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.consumers,
            vec![
                ConsumerSpec {
                    topic: "user-activity".to_string(),
                    group_id: Some("activity-log".to_string()),
                    start_offset: None,
                },
                ConsumerSpec {
                    topic: "notion-events".to_string(),
                    group_id: None,
                    start_offset: Some(StartOffset::Earliest),
                },
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
        assert_eq!(config.service.shutdown_grace(), Duration::from_secs(5));
        assert!(config.consumers.is_empty());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[kafka\nbootstrap_servers = ").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ActivityError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ActivityError::Io(_))));
    }

    #[test]
    fn test_validation_rejects_empty_consumer_topic() {
        let mut config = Config::default();
        config.consumers.push(ConsumerSpec {
            topic: String::new(),
            group_id: None,
            start_offset: None,
        });

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consumers[0].topic"));
    }

    #[test]
    fn test_validation_wraps_client_errors() {
        let config = Config::for_servers("");
        assert!(matches!(config.validate(), Err(ActivityError::InvalidConfig(_))));
    }
}
