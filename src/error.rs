use activitymq_client::ClientError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ActivityError>;

#[derive(Error, Debug)]
pub enum ActivityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Service is not running")]
    NotRunning,
}

impl From<toml::de::Error> for ActivityError {
    fn from(err: toml::de::Error) -> Self {
        ActivityError::Config(err.to_string())
    }
}
