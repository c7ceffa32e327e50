use thiserror::Error;

/// Result type alias for ActivityMQ client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Structural classification of client failures.
///
/// Callers switch on this instead of inspecting error text. Only
/// [`ErrorKind::Connectivity`] triggers a producer reinitialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The producer could not be created or never completed its handshake
    Initialization,
    /// Broker unreachable: all brokers down, transport failure, no handle
    Connectivity,
    /// Acknowledgment did not arrive before the deadline
    Timeout,
    /// The broker answered but refused the record
    Rejected,
    /// Value or key could not be encoded
    Serialization,
    /// A payload on the wire could not be decoded
    Deserialization,
    /// A consumer could not be created or subscribed
    ConsumerSetup,
    /// A user-supplied handler failed or panicked
    Handler,
    /// Caller violated a precondition (empty topic, bad config)
    InvalidInput,
    /// The subscription or client was already closed
    Closed,
}

/// Errors that can occur in the ActivityMQ client
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Producer could not be initialized
    #[error("Producer initialization failed: {0}")]
    Initialization(String),

    /// No producer connection is currently available
    #[error("No producer connection available")]
    NoConnectionAvailable,

    /// Broker unreachable or transport-level failure
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// Acknowledgment deadline elapsed
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Broker rejected the record
    #[error("Broker rejected message for topic {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    /// Message serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Message deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Consumer setup error
    #[error("Consumer setup failed for topic {topic}: {reason}")]
    ConsumerSetup { topic: String, reason: String },

    /// Consumer read error after setup
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Handler returned an error or panicked
    #[error("Handler failed: {0}")]
    Handler(String),

    /// Topic name was empty
    #[error("Topic name must not be empty")]
    EmptyTopic,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Subscription or client already closed
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ClientError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        ClientError::Timeout { timeout_ms: 0 }
    }
}

impl ClientError {
    /// Structural kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Initialization(_) => ErrorKind::Initialization,
            ClientError::NoConnectionAvailable | ClientError::Connection(_) => {
                ErrorKind::Connectivity
            }
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Rejected { .. } => ErrorKind::Rejected,
            ClientError::Serialization(_) => ErrorKind::Serialization,
            ClientError::Deserialization(_) => ErrorKind::Deserialization,
            ClientError::ConsumerSetup { .. } | ClientError::Consumer(_) => {
                ErrorKind::ConsumerSetup
            }
            ClientError::Handler(_) => ErrorKind::Handler,
            ClientError::EmptyTopic | ClientError::InvalidConfig(_) => ErrorKind::InvalidInput,
            ClientError::Closed(_) => ErrorKind::Closed,
        }
    }

    /// Whether this failure should trigger a producer reinitialization
    pub fn is_connectivity(&self) -> bool {
        self.kind() == ErrorKind::Connectivity
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Initialization => "initialization",
            ErrorKind::Connectivity => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::ConsumerSetup => "consumer",
            ErrorKind::Handler => "handler",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(ClientError::NoConnectionAvailable.is_connectivity());
        assert!(ClientError::Connection("all brokers down".to_string()).is_connectivity());

        assert!(!ClientError::Timeout { timeout_ms: 5000 }.is_connectivity());
        assert!(!ClientError::Rejected {
            topic: "t".to_string(),
            reason: "too large".to_string()
        }
        .is_connectivity());
        // Text alone never makes an error a connectivity failure
        assert!(!ClientError::Serialization("NoBrokersAvailable".to_string()).is_connectivity());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ClientError::Deserialization("bad".to_string()).category(), "deserialization");
        assert_eq!(ClientError::Timeout { timeout_ms: 5000 }.category(), "timeout");
        assert_eq!(ClientError::EmptyTopic.kind(), ErrorKind::InvalidInput);
        assert_eq!(ClientError::Closed("subscription").to_string(), "subscription is closed");
    }
}
