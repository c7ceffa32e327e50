use crate::{
    config::{ClientConfig, StartOffset},
    connection::{ConnectionManager, ConnectionState},
    consumer::{ConsumerFactory, Subscription},
    error::{ClientError, Result},
    message::Delivery,
    producer::{Publisher, PublisherStats},
    runner::{ConsumerRunner, MessageHandler, RunnerHandle, RunnerMonitor, RunnerState},
    transport::BrokerConnector,
};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Main ActivityMQ client: one producer connection, any number of consumers.
///
/// Cloning yields another handle to the same client. There is no global
/// instance; construct one at startup and pass it where it is needed.
#[derive(Clone)]
pub struct KafkaClient {
    config: Arc<ClientConfig>,
    connection: Arc<ConnectionManager>,
    publisher: Publisher,
    factory: ConsumerFactory,
    runner: ConsumerRunner,
    runners: Arc<DashMap<String, RunnerMonitor>>,
    shutdown: CancellationToken,
}

impl KafkaClient {
    /// Create a client backed by librdkafka
    #[cfg(feature = "kafka")]
    pub async fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(Arc::new(crate::kafka::KafkaConnector::new()), config).await
    }

    /// Create a client on top of any transport.
    ///
    /// Only an invalid configuration fails; an unreachable broker leaves the
    /// producer connection `Failed` until it is reinitialized.
    pub async fn with_connector(connector: Arc<dyn BrokerConnector>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let connection = Arc::new(ConnectionManager::initialize(connector.clone(), config.clone()).await);
        let publisher = Publisher::new(connection.clone(), config.clone());
        let factory = ConsumerFactory::new(connector, config.clone());
        let runner = ConsumerRunner::new(factory.clone());

        Ok(Self {
            config,
            connection,
            publisher,
            factory,
            runner,
            runners: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Send an optionally keyed message; `true` once acknowledged
    pub async fn send<T: Serialize + ?Sized>(&self, topic: &str, value: &T, key: Option<&str>) -> bool {
        self.refuse_if_shut_down(topic).is_ok() && self.publisher.send(topic, value, key).await
    }

    /// Send with a non-string key, stringified before encoding
    pub async fn send_keyed<T, K>(&self, topic: &str, value: &T, key: &K) -> bool
    where
        T: Serialize + ?Sized,
        K: Display + ?Sized,
    {
        self.refuse_if_shut_down(topic).is_ok() && self.publisher.send_keyed(topic, value, key).await
    }

    /// Send and return the acknowledgment or the typed failure
    pub async fn send_detailed<T, K>(&self, topic: &str, value: &T, key: Option<&K>) -> Result<Delivery>
    where
        T: Serialize + ?Sized,
        K: Display + ?Sized,
    {
        self.refuse_if_shut_down(topic)?;
        self.publisher.send_detailed(topic, value, key).await
    }

    /// Open a subscription; `None` when the consumer cannot be set up
    pub async fn create_consumer(
        &self,
        topic: &str,
        group_id: Option<&str>,
        start_offset: StartOffset,
    ) -> Option<Subscription> {
        self.refuse_if_shut_down(topic).ok()?;
        self.factory.create_consumer(topic, group_id, start_offset).await
    }

    /// Start a background consumer; it is stopped by [`KafkaClient::shutdown`]
    pub fn start_consumer<H: MessageHandler>(&self, topic: &str, handler: H, group_id: Option<&str>) -> RunnerHandle {
        self.start_consumer_from(topic, handler, group_id, self.config.consumer.start_offset)
    }

    /// Like [`KafkaClient::start_consumer`] with an explicit start offset
    pub fn start_consumer_from<H: MessageHandler>(
        &self,
        topic: &str,
        handler: H,
        group_id: Option<&str>,
        start_offset: StartOffset,
    ) -> RunnerHandle {
        self.runners.retain(|_, monitor| monitor.state() != RunnerState::Stopped);

        let handle = self.runner.start_with(
            topic,
            handler,
            group_id,
            start_offset,
            self.shutdown.child_token(),
        );
        self.runners.insert(handle.id().to_string(), handle.monitor());
        handle
    }

    /// Monitors of runners that have not stopped yet
    pub fn runners(&self) -> Vec<RunnerMonitor> {
        self.runners
            .iter()
            .filter(|entry| entry.value().state() != RunnerState::Stopped)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Reconnect the producer explicitly
    pub async fn reinitialize(&self) -> ConnectionState {
        self.connection.reinitialize().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    /// Publisher sharing this client's connection
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop all runners started through this client, then close the producer.
    ///
    /// Runners get `grace` to finish the message in flight.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down Kafka client");
        self.shutdown.cancel();

        let monitors: Vec<RunnerMonitor> = self
            .runners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for monitor in monitors {
            if monitor
                .wait_for_timeout(RunnerState::Stopped, grace)
                .await
                .is_none()
            {
                warn!(
                    "Consumer runner {} for topic {} did not stop within {:?}",
                    monitor.id(),
                    monitor.topic(),
                    grace
                );
            }
        }
        self.runners.clear();

        self.connection.close().await;
        info!("Kafka client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn refuse_if_shut_down(&self, topic: &str) -> Result<()> {
        if self.is_shut_down() {
            warn!("Kafka client is shut down, ignoring request for topic {}", topic);
            return Err(ClientError::Closed("client"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::runner::sync_handler;

    async fn client_for(broker: &InMemoryBroker) -> KafkaClient {
        let mut config = ClientConfig::default();
        config.consumer.poll_timeout_ms = 20;
        KafkaClient::with_connector(Arc::new(broker.clone()), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let broker = InMemoryBroker::new();
        let config = ClientConfig {
            bootstrap_servers: String::new(),
            ..Default::default()
        };

        let result = KafkaClient::with_connector(Arc::new(broker), config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_broker_still_builds_client() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);

        let client = client_for(&broker).await;
        assert_eq!(client.connection_state(), ConnectionState::Failed);

        broker.set_available(true);
        assert_eq!(client.reinitialize().await, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_stops_runners_and_closes_producer() {
        let broker = InMemoryBroker::new();
        let client = client_for(&broker).await;

        let first = client.start_consumer("a", sync_handler(|_, _| Ok(())), None);
        let second = client.start_consumer("b", sync_handler(|_, _| Ok(())), Some("g"));
        first.monitor().wait_for(RunnerState::Running).await;
        second.monitor().wait_for(RunnerState::Running).await;
        assert_eq!(client.runners().len(), 2);

        client.shutdown(Duration::from_secs(5)).await;

        assert!(client.is_shut_down());
        assert_eq!(first.state(), RunnerState::Stopped);
        assert_eq!(second.state(), RunnerState::Stopped);
        assert!(client.runners().is_empty());
        assert_eq!(client.connection_state(), ConnectionState::Uninitialized);
        assert_eq!(broker.open_consumers(), 0);
    }

    #[tokio::test]
    async fn test_shut_down_client_refuses_work() {
        let broker = InMemoryBroker::new();
        let client = client_for(&broker).await;
        client.shutdown(Duration::from_millis(100)).await;
        let connects = broker.producer_connects();

        assert!(!client.send("t", &1, None).await);
        assert!(matches!(
            client.send_detailed::<_, str>("t", &1, None).await,
            Err(ClientError::Closed("client"))
        ));
        assert!(client.create_consumer("t", None, StartOffset::Earliest).await.is_none());
        assert_eq!(broker.producer_connects(), connects);

        let handle = client.start_consumer("t", sync_handler(|_, _| Ok(())), None);
        assert_eq!(handle.join().await, crate::runner::RunnerExit::Cancelled);
    }

    #[tokio::test]
    async fn test_stopped_runners_are_not_listed() {
        let broker = InMemoryBroker::new();
        let client = client_for(&broker).await;

        let handle = client.start_consumer("a", sync_handler(|_, _| Ok(())), None);
        handle.monitor().wait_for(RunnerState::Running).await;
        handle.stop().await;

        assert!(client.runners().is_empty());
    }
}
