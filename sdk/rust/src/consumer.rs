use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::config::{ClientConfig, StartOffset};
use crate::error::{ClientError, Result};
use crate::message::Message;
use crate::transport::{BrokerConnector, ConsumerHandle, SubscriptionSpec};

/// Creates subscriptions bound to a single topic
#[derive(Clone)]
pub struct ConsumerFactory {
    connector: Arc<dyn BrokerConnector>,
    config: Arc<ClientConfig>,
}

impl ConsumerFactory {
    pub fn new(connector: Arc<dyn BrokerConnector>, config: Arc<ClientConfig>) -> Self {
        Self { connector, config }
    }

    /// Open a subscription; setup failures are logged and yield `None`
    pub async fn create_consumer(
        &self,
        topic: &str,
        group_id: Option<&str>,
        start_offset: StartOffset,
    ) -> Option<Subscription> {
        match self.try_create_consumer(topic, group_id, start_offset).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                error!("Failed to create Kafka consumer: {}", e);
                None
            }
        }
    }

    /// Open a subscription and return the setup error on failure
    pub async fn try_create_consumer(
        &self,
        topic: &str,
        group_id: Option<&str>,
        start_offset: StartOffset,
    ) -> Result<Subscription> {
        if topic.is_empty() {
            return Err(ClientError::EmptyTopic);
        }

        let spec = SubscriptionSpec::new(topic)
            .group(group_id)
            .start_offset(start_offset);

        let handle = match timeout(
            self.config.connect_timeout(),
            self.connector.connect_consumer(&self.config, &spec),
        )
        .await
        {
            Ok(handle) => handle?,
            Err(_) => {
                return Err(ClientError::ConsumerSetup {
                    topic: topic.to_string(),
                    reason: format!("timed out after {}ms", self.config.connect_timeout_ms),
                })
            }
        };

        info!("Kafka consumer created for topic {}", topic);
        Ok(Subscription {
            id: format!("subscription-{}", Uuid::new_v4()),
            spec,
            handle: Some(handle),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// A live subscription yielding deserialized `(key, value)` messages.
///
/// The sequence is unbounded and cannot be restarted: once closed, a new
/// subscription has to be created.
pub struct Subscription {
    id: String,
    spec: SubscriptionSpec,
    handle: Option<Box<dyn ConsumerHandle>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.spec.topic
    }

    pub fn group_id(&self) -> Option<&str> {
        self.spec.group_id.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Wait for the next message without bound.
    ///
    /// `None` once the subscription is closed. A malformed payload yields
    /// `Some(Err(ClientError::Deserialization(_)))` and the sequence goes on.
    /// Any other read error is yielded once, then the subscription closes.
    pub async fn next(&mut self) -> Option<Result<Message>> {
        let handle = self.handle.as_mut()?;
        match handle.poll(None).await {
            Ok(Some(record)) => Some(codec::decode_record(&record)),
            // Unbounded polls only return empty when the handle shut down
            Ok(None) | Err(ClientError::Closed(_)) => {
                self.close().await;
                None
            }
            Err(e) => {
                self.fail(&e).await;
                Some(Err(e))
            }
        }
    }

    /// Wait at most `wait` for the next message; `Ok(None)` when nothing arrived.
    ///
    /// Read errors other than malformed payloads close the subscription.
    pub async fn next_timeout(&mut self, wait: Duration) -> Result<Option<Message>> {
        let handle = self.handle.as_mut().ok_or(ClientError::Closed("subscription"))?;
        match handle.poll(Some(wait)).await {
            Ok(Some(record)) => codec::decode_record(&record).map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    async fn fail(&mut self, err: &ClientError) {
        warn!(
            "Subscription {} on topic {} lost its consumer: {}",
            self.id, self.spec.topic, err
        );
        self.close().await;
    }

    /// Release the consumer; later reads end the sequence
    pub async fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
            debug!("Subscription {} on topic {} closed", self.id, self.spec.topic);
        }
    }

    /// Adapt into a `Stream` of messages
    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|item| (item, subscription))
        })
    }
}
