//! Kafka transport backed by librdkafka.

use async_trait::async_trait;
use rdkafka::config::{ClientConfig as RdClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::message::{Delivery, InboundRecord, OutboundRecord};
use crate::transport::{BrokerConnector, ConsumerHandle, ProducerHandle, SubscriptionSpec};

/// librdkafka debug contexts enabled by `KAFKA_DEBUG`
const DEBUG_CONTEXTS: &str = "broker,topic,msg,consumer,cgrp";

/// Connector producing rdkafka-backed handles
#[derive(Debug, Clone, Default)]
pub struct KafkaConnector;

impl KafkaConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Codes that mean the broker cannot be reached at all
fn is_connectivity_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::BrokerNotAvailable
    )
}

/// Map an rdkafka error on the produce path to a typed client error
fn classify_produce_error(err: &KafkaError, topic: &str, timeout: Duration) -> ClientError {
    match err.rdkafka_error_code() {
        Some(code) if is_connectivity_code(code) => ClientError::Connection(err.to_string()),
        Some(RDKafkaErrorCode::MessageTimedOut)
        | Some(RDKafkaErrorCode::RequestTimedOut)
        | Some(RDKafkaErrorCode::OperationTimedOut) => ClientError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        _ => ClientError::Rejected {
            topic: topic.to_string(),
            reason: err.to_string(),
        },
    }
}

fn base_config(config: &ClientConfig) -> RdClientConfig {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("activitymq-{}", Uuid::new_v4()));

    let mut rd_config = RdClientConfig::new();
    rd_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("client.id", client_id)
        .set(
            "socket.connection.setup.timeout.ms",
            config.connect_timeout_ms.to_string(),
        )
        .set(
            "connections.max.idle.ms",
            config.connections_max_idle_ms.to_string(),
        )
        .set("reconnect.backoff.ms", config.reconnect_backoff_ms.to_string())
        .set(
            "reconnect.backoff.max.ms",
            config.reconnect_backoff_max_ms.to_string(),
        );

    if config.debug {
        rd_config
            .set("debug", DEBUG_CONTEXTS)
            .set_log_level(RDKafkaLogLevel::Debug);
    }

    rd_config
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect_producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerHandle>> {
        let mut rd_config = base_config(config);
        rd_config
            .set("request.timeout.ms", config.request_timeout_ms.to_string())
            .set("message.timeout.ms", config.ack_timeout_ms.to_string());

        let producer: FutureProducer = rd_config
            .create()
            .map_err(|e| ClientError::Initialization(e.to_string()))?;

        // librdkafka connects lazily; a metadata round trip is the handshake
        let handshake = producer.clone();
        let handshake_timeout = config.connect_timeout();
        tokio::task::spawn_blocking(move || {
            handshake
                .client()
                .fetch_metadata(None, Timeout::After(handshake_timeout))
                .map(|_| ())
        })
        .await
        .map_err(|e| ClientError::Initialization(e.to_string()))?
        .map_err(|e| ClientError::Initialization(e.to_string()))?;

        info!(
            "Kafka producer connected to bootstrap servers: {}",
            config.bootstrap_servers
        );
        Ok(Arc::new(KafkaProducer { producer }))
    }

    async fn connect_consumer(
        &self,
        config: &ClientConfig,
        subscription: &SubscriptionSpec,
    ) -> Result<Box<dyn ConsumerHandle>> {
        let rd_config = consumer_config(config, subscription);
        let topic = subscription.topic.clone();

        // Creating the client and joining the group call into librdkafka
        let consumer = tokio::task::spawn_blocking(move || -> std::result::Result<StreamConsumer, String> {
            let consumer: StreamConsumer = rd_config.create().map_err(|e| e.to_string())?;
            consumer.subscribe(&[topic.as_str()]).map_err(|e| e.to_string())?;
            Ok(consumer)
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|created| created)
        .map_err(|reason| ClientError::ConsumerSetup {
            topic: subscription.topic.clone(),
            reason,
        })?;

        debug!("rdkafka consumer ready for topic {}", subscription.topic);
        Ok(Box::new(KafkaConsumer {
            consumer: Some(consumer),
            topic: subscription.topic.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}

/// librdkafka settings for a consumer of `subscription`.
///
/// Without a group id the consumer joins a private group that never commits,
/// so it reads independently and the topic may appear after it subscribed.
fn consumer_config(config: &ClientConfig, subscription: &SubscriptionSpec) -> RdClientConfig {
    let consumer_config = &config.consumer;

    let mut rd_config = base_config(config);
    rd_config
        .set(
            "socket.timeout.ms",
            consumer_config.request_timeout_ms.to_string(),
        )
        .set(
            "session.timeout.ms",
            consumer_config.session_timeout_ms.to_string(),
        )
        .set(
            "heartbeat.interval.ms",
            consumer_config.heartbeat_interval_ms.to_string(),
        )
        .set(
            "connections.max.idle.ms",
            consumer_config.connections_max_idle_ms.to_string(),
        )
        .set(
            "reconnect.backoff.ms",
            consumer_config.reconnect_backoff_ms.to_string(),
        )
        .set(
            "reconnect.backoff.max.ms",
            consumer_config.reconnect_backoff_max_ms.to_string(),
        )
        .set("auto.offset.reset", subscription.start_offset.as_str());

    match &subscription.group_id {
        Some(group_id) => {
            rd_config
                .set("group.id", group_id)
                .set("enable.auto.commit", "true");
        }
        None => {
            rd_config
                .set("group.id", format!("activitymq-standalone-{}", Uuid::new_v4()))
                .set("enable.auto.commit", "false");
        }
    }

    rd_config
}

struct KafkaProducer {
    producer: FutureProducer,
}

#[async_trait]
impl ProducerHandle for KafkaProducer {
    async fn send(&self, record: OutboundRecord, timeout: Duration) -> Result<Delivery> {
        let mut future_record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&record.topic).payload(record.payload.as_slice());
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }

        match self
            .producer
            .send(future_record, Timeout::After(timeout))
            .await
        {
            Ok((partition, offset)) => Ok(Delivery {
                topic: record.topic.clone(),
                partition,
                offset,
            }),
            Err((err, _message)) => Err(classify_produce_error(&err, &record.topic, timeout)),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))?
            .map_err(|e| classify_produce_error(&e, "*", timeout))
    }
}

struct KafkaConsumer {
    consumer: Option<StreamConsumer>,
    topic: String,
}

/// Consumer-side errors librdkafka recovers from on its own. A topic that
/// does not exist yet is reported until it is created.
fn is_transient_consume_error(err: &KafkaError) -> bool {
    if matches!(err, KafkaError::PartitionEOF(_)) {
        return true;
    }
    match err.rdkafka_error_code() {
        Some(code) => {
            is_connectivity_code(code)
                || matches!(
                    code,
                    RDKafkaErrorCode::PartitionEOF
                        | RDKafkaErrorCode::UnknownTopicOrPartition
                        | RDKafkaErrorCode::UnknownTopic
                )
        }
        None => false,
    }
}

impl KafkaConsumer {
    async fn recv(consumer: &StreamConsumer, topic: &str) -> Result<InboundRecord> {
        loop {
            match consumer.recv().await {
                Ok(message) => {
                    return Ok(InboundRecord {
                        topic: message.topic().to_string(),
                        partition: message.partition(),
                        offset: message.offset(),
                        key: message.key().map(<[u8]>::to_vec),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    })
                }
                Err(err) if is_transient_consume_error(&err) => {
                    warn!("Transient consumer error on topic {}: {}", topic, err);
                }
                Err(err) => return Err(ClientError::Consumer(err.to_string())),
            }
        }
    }
}

#[async_trait]
impl ConsumerHandle for KafkaConsumer {
    async fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<InboundRecord>> {
        let consumer = self.consumer.as_ref().ok_or(ClientError::Closed("consumer"))?;

        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, Self::recv(consumer, &self.topic)).await {
                Ok(record) => record.map(Some),
                Err(_) => Ok(None),
            },
            None => Self::recv(consumer, &self.topic).await.map(Some),
        }
    }

    async fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            // Leaving the group may wait on the coordinator
            let released = tokio::task::spawn_blocking(move || {
                consumer.unsubscribe();
                drop(consumer);
            })
            .await;
            if let Err(e) = released {
                debug!("Error releasing consumer for topic {}: {}", self.topic, e);
            }
            info!("Kafka consumer for topic {} closed", self.topic);
        }
    }
}
