use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ClientConfig, StartOffset};
use crate::error::Result;
use crate::message::{Delivery, InboundRecord, OutboundRecord};

/// Factory for broker connections.
///
/// Implemented by the Kafka binding and by [`crate::memory::InMemoryBroker`].
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open a producer connection and complete its handshake
    async fn connect_producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerHandle>>;

    /// Open a consumer bound to a single topic
    async fn connect_consumer(
        &self,
        config: &ClientConfig,
        subscription: &SubscriptionSpec,
    ) -> Result<Box<dyn ConsumerHandle>>;

    /// Short transport name for logs
    fn name(&self) -> &'static str;
}

/// A connected producer. Must be safe for concurrent `send` calls.
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    /// Submit a record and wait up to `timeout` for the acknowledgment
    async fn send(&self, record: OutboundRecord, timeout: Duration) -> Result<Delivery>;

    /// Wait for in-flight records to be acknowledged
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

/// A connected consumer, owned by exactly one reader
#[async_trait]
pub trait ConsumerHandle: Send {
    /// Wait for the next record.
    ///
    /// `None` waits without bound. Returns `Ok(None)` when a bounded wait
    /// elapses without a record.
    async fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<InboundRecord>>;

    /// Release the broker-side resources held by this consumer
    async fn close(&mut self);
}

/// What a consumer subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub topic: String,
    pub group_id: Option<String>,
    pub start_offset: StartOffset,
}

impl SubscriptionSpec {
    pub fn new<T: Into<String>>(topic: T) -> Self {
        Self {
            topic: topic.into(),
            group_id: None,
            start_offset: StartOffset::default(),
        }
    }

    pub fn group<T: Into<String>>(mut self, group_id: Option<T>) -> Self {
        self.group_id = group_id.map(Into::into);
        self
    }

    pub fn start_offset(mut self, start_offset: StartOffset) -> Self {
        self.start_offset = start_offset;
        self
    }
}
