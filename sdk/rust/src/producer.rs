use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{ClientError, Result};
use crate::message::Delivery;

/// Sends messages through the shared producer connection.
///
/// `send` never fails loudly: every failure is logged and reported as
/// `false`. Use [`Publisher::send_detailed`] to inspect the error.
#[derive(Clone)]
pub struct Publisher {
    connection: Arc<ConnectionManager>,
    config: Arc<ClientConfig>,
    metrics: Arc<PublisherMetrics>,
}

/// Publisher counters
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    pub messages_sent: AtomicU64,
    pub messages_failed: AtomicU64,
    pub reinitializations: AtomicU64,
}

/// Copy of the publisher counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherStats {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub reinitializations: u64,
}

impl Publisher {
    pub fn new(connection: Arc<ConnectionManager>, config: Arc<ClientConfig>) -> Self {
        Self {
            connection,
            config,
            metrics: Arc::new(PublisherMetrics::default()),
        }
    }

    /// Send an optionally keyed message and wait for the acknowledgment.
    ///
    /// Returns `true` once the broker confirmed the record, `false` otherwise.
    pub async fn send<T: Serialize + ?Sized>(&self, topic: &str, value: &T, key: Option<&str>) -> bool {
        self.send_detailed(topic, value, key).await.is_ok()
    }

    /// Like [`Publisher::send`] with a non-string key, stringified first
    pub async fn send_keyed<T, K>(&self, topic: &str, value: &T, key: &K) -> bool
    where
        T: Serialize + ?Sized,
        K: Display + ?Sized,
    {
        self.send_detailed(topic, value, Some(key)).await.is_ok()
    }

    /// Send and return the acknowledgment or the typed failure
    pub async fn send_detailed<T, K>(&self, topic: &str, value: &T, key: Option<&K>) -> Result<Delivery>
    where
        T: Serialize + ?Sized,
        K: Display + ?Sized,
    {
        let result = self.try_send(topic, value, key).await;

        match &result {
            Ok(delivery) => {
                self.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Message sent to topic {} partition {} offset {}",
                    delivery.topic, delivery.partition, delivery.offset
                );
            }
            Err(e) => {
                self.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
                error!("Failed to send message to Kafka topic {}: {}", topic, e);
            }
        }

        result
    }

    /// Current counters
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            messages_sent: self.metrics.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.metrics.messages_failed.load(Ordering::Relaxed),
            reinitializations: self.metrics.reinitializations.load(Ordering::Relaxed),
        }
    }

    async fn try_send<T, K>(&self, topic: &str, value: &T, key: Option<&K>) -> Result<Delivery>
    where
        T: Serialize + ?Sized,
        K: Display + ?Sized,
    {
        if topic.is_empty() {
            return Err(ClientError::EmptyTopic);
        }

        let record = codec::encode_record(topic, value, key)?;

        let mut snapshot = self.connection.snapshot();
        let mut reinitialized = false;

        if snapshot.handle.is_none() {
            error!("Kafka producer not initialized");
            if !self.config.reconnect.reinit_on_failure {
                return Err(ClientError::NoConnectionAvailable);
            }
            self.bounded_reinitialize(snapshot.generation).await;
            reinitialized = true;
            snapshot = self.connection.snapshot();
        }

        let handle = snapshot.handle.ok_or(ClientError::NoConnectionAvailable)?;
        let ack_timeout = self.config.ack_timeout();

        let outcome = match timeout(ack_timeout, handle.send(record, ack_timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: self.config.ack_timeout_ms,
            }),
        };

        if let Err(e) = &outcome {
            if e.is_connectivity() && self.config.reconnect.reinit_on_failure && !reinitialized {
                self.connection.invalidate_generation(snapshot.generation);
                self.bounded_reinitialize(snapshot.generation).await;
            }
        }

        outcome
    }

    /// One reinitialization, bounded by the reconnect policy's timeout
    async fn bounded_reinitialize(&self, observed_generation: u64) -> ConnectionState {
        self.metrics.reinitializations.fetch_add(1, Ordering::Relaxed);

        match timeout(
            self.config.reinit_timeout(),
            self.connection.reinitialize_after(Some(observed_generation)),
        )
        .await
        {
            Ok(state) => {
                debug!("Producer reinitialization finished in state {:?}", state);
                state
            }
            Err(_) => {
                warn!(
                    "Producer reinitialization abandoned after {}ms",
                    self.config.reconnect.reinit_timeout_ms
                );
                self.connection.state()
            }
        }
    }
}
