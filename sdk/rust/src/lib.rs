//! ActivityMQ Client Library
//!
//! Resilient async wrapper around a Kafka producer and consumers: boolean
//! sends that never raise, optional subscriptions, and background consumer
//! runners that isolate handler failures.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod producer;
pub mod runner;
pub mod transport;

pub use client::KafkaClient;
pub use config::{ClientConfig, ConsumerConfig, ReconnectPolicy, StartOffset};
pub use connection::{ConnectionManager, ConnectionState};
pub use consumer::{ConsumerFactory, Subscription};
pub use error::{ClientError, ErrorKind, Result};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
pub use memory::InMemoryBroker;
pub use message::{Delivery, Message};
pub use producer::{Publisher, PublisherStats};
pub use runner::{
    sync_handler, ConsumerRunner, HandlerResult, MessageHandler, RunnerExit, RunnerHandle,
    RunnerMonitor, RunnerState, RunnerStats,
};
pub use transport::{BrokerConnector, ConsumerHandle, ProducerHandle, SubscriptionSpec};
