//! Embedded broker that keeps partitioned topics in memory.
//!
//! Records are routed by key hash, so a key always lands on the same
//! partition and keeps its order. Consumers sharing a group id claim records
//! from a shared offset table; consumers without a group read independently.
//! Availability can be switched off to simulate an outage.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::config::{ClientConfig, StartOffset};
use crate::error::{ClientError, Result};
use crate::message::{Delivery, InboundRecord, OutboundRecord};
use crate::transport::{BrokerConnector, ConsumerHandle, ProducerHandle, SubscriptionSpec};

const DEFAULT_PARTITIONS: usize = 3;

/// Key into the shared group offset table
type GroupPartition = (String, String, i32);

/// In-memory broker implementing [`BrokerConnector`]
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerState>,
}

struct BrokerState {
    partitions_per_topic: usize,
    topics: RwLock<HashMap<String, Vec<Vec<InboundRecord>>>>,
    group_offsets: DashMap<GroupPartition, i64>,
    appended: Notify,
    available: AtomicBool,
    ack_delay: Mutex<Option<Duration>>,
    round_robin: AtomicU64,
    producer_connects: AtomicUsize,
    consumer_connects: AtomicUsize,
    open_consumers: AtomicUsize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions_per_topic: usize) -> Self {
        Self {
            inner: Arc::new(BrokerState {
                partitions_per_topic: partitions_per_topic.max(1),
                topics: RwLock::new(HashMap::new()),
                group_offsets: DashMap::new(),
                appended: Notify::new(),
                available: AtomicBool::new(true),
                ack_delay: Mutex::new(None),
                round_robin: AtomicU64::new(0),
                producer_connects: AtomicUsize::new(0),
                consumer_connects: AtomicUsize::new(0),
                open_consumers: AtomicUsize::new(0),
            }),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`)
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        // Wake blocked consumers so they observe the change
        self.inner.appended.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Delay every acknowledgment; a delay above the send deadline times out
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        *self.inner.ack_delay.lock() = delay;
    }

    /// Number of producer connection attempts seen
    pub fn producer_connects(&self) -> usize {
        self.inner.producer_connects.load(Ordering::SeqCst)
    }

    /// Number of consumer connection attempts seen
    pub fn consumer_connects(&self) -> usize {
        self.inner.consumer_connects.load(Ordering::SeqCst)
    }

    /// Consumers connected and not yet closed
    pub fn open_consumers(&self) -> usize {
        self.inner.open_consumers.load(Ordering::SeqCst)
    }

    /// Append raw bytes, bypassing the codec
    pub fn inject(&self, topic: &str, key: Option<&[u8]>, payload: &[u8]) -> Delivery {
        self.inner.append(OutboundRecord {
            topic: topic.to_string(),
            key: key.map(<[u8]>::to_vec),
            payload: payload.to_vec(),
        })
    }

    /// All records of a topic, partition by partition
    pub fn records(&self, topic: &str) -> Vec<InboundRecord> {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Committed offset of a group on one partition
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .group_offsets
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .map(|offset| *offset)
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ClientError::Connection("all brokers down".to_string()))
        }
    }
}

impl BrokerState {
    fn partition_for(&self, key: Option<&[u8]>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions_per_topic as u64) as usize
            }
            None => {
                (self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partitions_per_topic as u64)
                    as usize
            }
        }
    }

    fn ensure_topic(&self, topic: &str) {
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.partitions_per_topic]);
    }

    fn append(&self, record: OutboundRecord) -> Delivery {
        let partition = self.partition_for(record.key.as_deref());
        let offset = {
            let mut topics = self.topics.write();
            let partitions = topics
                .entry(record.topic.clone())
                .or_insert_with(|| vec![Vec::new(); self.partitions_per_topic]);
            let log = &mut partitions[partition];
            let offset = log.len() as i64;
            log.push(InboundRecord {
                topic: record.topic.clone(),
                partition: partition as i32,
                offset,
                key: record.key,
                payload: record.payload,
            });
            offset
        };
        self.appended.notify_waiters();
        trace!(topic = %record.topic, partition, offset, "appended record");

        Delivery {
            topic: record.topic,
            partition: partition as i32,
            offset,
        }
    }

    fn log_end(&self, topic: &str, partition: usize) -> i64 {
        self.topics
            .read()
            .get(topic)
            .and_then(|partitions| partitions.get(partition))
            .map(|log| log.len() as i64)
            .unwrap_or(0)
    }

    fn read_at(&self, topic: &str, partition: usize, offset: i64) -> Option<InboundRecord> {
        let topics = self.topics.read();
        topics
            .get(topic)?
            .get(partition)?
            .get(usize::try_from(offset).ok()?)
            .cloned()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect_producer(&self, _config: &ClientConfig) -> Result<Arc<dyn ProducerHandle>> {
        self.inner.producer_connects.fetch_add(1, Ordering::SeqCst);
        self.check_available()
            .map_err(|e| ClientError::Initialization(e.to_string()))?;

        Ok(Arc::new(MemoryProducer {
            broker: self.clone(),
        }))
    }

    async fn connect_consumer(
        &self,
        _config: &ClientConfig,
        subscription: &SubscriptionSpec,
    ) -> Result<Box<dyn ConsumerHandle>> {
        self.inner.consumer_connects.fetch_add(1, Ordering::SeqCst);
        self.check_available().map_err(|e| ClientError::ConsumerSetup {
            topic: subscription.topic.clone(),
            reason: e.to_string(),
        })?;

        let state = &self.inner;
        state.ensure_topic(&subscription.topic);

        let starts: Vec<i64> = (0..state.partitions_per_topic)
            .map(|partition| match subscription.start_offset {
                StartOffset::Earliest => 0,
                StartOffset::Latest => state.log_end(&subscription.topic, partition),
            })
            .collect();

        let positions = match &subscription.group_id {
            Some(group_id) => {
                for (partition, start) in starts.iter().enumerate() {
                    state
                        .group_offsets
                        .entry((group_id.clone(), subscription.topic.clone(), partition as i32))
                        .or_insert(*start);
                }
                Positions::Group(group_id.clone())
            }
            None => Positions::Local(starts),
        };

        state.open_consumers.fetch_add(1, Ordering::SeqCst);
        debug!(topic = %subscription.topic, group = ?subscription.group_id, "memory consumer connected");

        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            topic: subscription.topic.clone(),
            positions,
            next_partition: 0,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryProducer {
    broker: InMemoryBroker,
}

#[async_trait]
impl ProducerHandle for MemoryProducer {
    async fn send(&self, record: OutboundRecord, timeout: Duration) -> Result<Delivery> {
        self.broker.check_available()?;

        let delay = *self.broker.inner.ack_delay.lock();
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ClientError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(delay).await;
        }

        Ok(self.broker.inner.append(record))
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

enum Positions {
    /// Per-consumer positions, nothing shared
    Local(Vec<i64>),
    /// Positions claimed from the group offset table
    Group(String),
}

struct MemoryConsumer {
    broker: InMemoryBroker,
    topic: String,
    positions: Positions,
    next_partition: usize,
    closed: bool,
}

impl MemoryConsumer {
    /// Claim the next available record, scanning partitions round-robin
    fn try_claim(&mut self) -> Option<InboundRecord> {
        let state = &self.broker.inner;
        let partitions = state.partitions_per_topic;

        for step in 0..partitions {
            let partition = (self.next_partition + step) % partitions;
            let record = match &mut self.positions {
                Positions::Local(positions) => {
                    let record = state.read_at(&self.topic, partition, positions[partition]);
                    if record.is_some() {
                        positions[partition] += 1;
                    }
                    record
                }
                Positions::Group(group_id) => {
                    let key = (group_id.clone(), self.topic.clone(), partition as i32);
                    let mut offset = state.group_offsets.entry(key).or_insert(0);
                    let record = state.read_at(&self.topic, partition, *offset);
                    if record.is_some() {
                        *offset += 1;
                    }
                    record
                }
            };

            if record.is_some() {
                self.next_partition = (partition + 1) % partitions;
                return record;
            }
        }

        None
    }
}

#[async_trait]
impl ConsumerHandle for MemoryConsumer {
    async fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<InboundRecord>> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let broker = self.broker.clone();

        loop {
            if self.closed {
                return Err(ClientError::Closed("consumer"));
            }

            let notified = broker.inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !broker.is_available() {
                return Err(ClientError::Consumer(
                    "broker connection lost: all brokers down".to_string(),
                ));
            }

            if let Some(record) = self.try_claim() {
                return Ok(Some(record));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.broker.inner.open_consumers.fetch_sub(1, Ordering::SeqCst);
            debug!(topic = %self.topic, "memory consumer closed");
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.inner.open_consumers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(topic: &str, key: Option<&str>, payload: &str) -> OutboundRecord {
        OutboundRecord {
            topic: topic.to_string(),
            key: key.map(|k| k.as_bytes().to_vec()),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_same_key_lands_on_same_partition() {
        let broker = InMemoryBroker::with_partitions(8);
        let producer = broker.connect_producer(&ClientConfig::default()).await.unwrap();

        let first = producer
            .send(record("t", Some("alice"), "1"), Duration::from_secs(1))
            .await
            .unwrap();
        let second = producer
            .send(record("t", Some("alice"), "2"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn test_outage_rejects_connections() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);

        let producer = broker.connect_producer(&ClientConfig::default()).await;
        assert!(matches!(producer, Err(ClientError::Initialization(_))));

        let consumer = broker
            .connect_consumer(&ClientConfig::default(), &SubscriptionSpec::new("t"))
            .await;
        assert!(matches!(consumer, Err(ClientError::ConsumerSetup { .. })));

        assert_eq!(broker.producer_connects(), 1);
        assert_eq!(broker.consumer_connects(), 1);
    }

    #[tokio::test]
    async fn test_latest_skips_existing_records() {
        let broker = InMemoryBroker::with_partitions(1);
        broker.inject("t", None, b"old");

        let spec = SubscriptionSpec::new("t").start_offset(StartOffset::Latest);
        let mut consumer = broker
            .connect_consumer(&ClientConfig::default(), &spec)
            .await
            .unwrap();

        let polled = consumer.poll(Some(Duration::from_millis(20))).await.unwrap();
        assert!(polled.is_none());

        broker.inject("t", None, b"new");
        let polled = consumer.poll(Some(Duration::from_secs(1))).await.unwrap().unwrap();
        assert_eq!(polled.payload, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_group_members_share_offsets() {
        let broker = InMemoryBroker::with_partitions(1);
        for payload in ["a", "b"] {
            broker.inject("t", None, payload.as_bytes());
        }

        let spec = SubscriptionSpec::new("t").group(Some("g"));
        let config = ClientConfig::default();
        let mut first = broker.connect_consumer(&config, &spec).await.unwrap();
        let mut second = broker.connect_consumer(&config, &spec).await.unwrap();

        let a = first.poll(Some(Duration::from_secs(1))).await.unwrap().unwrap();
        let b = second.poll(Some(Duration::from_secs(1))).await.unwrap().unwrap();
        assert_eq!(a.payload, b"a".to_vec());
        assert_eq!(b.payload, b"b".to_vec());
        assert_eq!(broker.committed_offset("g", "t", 0), Some(2));
    }

    #[tokio::test]
    async fn test_blocked_poll_wakes_on_append() {
        let broker = InMemoryBroker::new();
        let mut consumer = broker
            .connect_consumer(&ClientConfig::default(), &SubscriptionSpec::new("t"))
            .await
            .unwrap();

        let injector = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            injector.inject("t", Some(b"k"), b"{}");
        });

        let polled = consumer.poll(None).await.unwrap().unwrap();
        assert_eq!(polled.key, Some(b"k".to_vec()));

        consumer.close().await;
        assert_eq!(broker.open_consumers(), 0);
    }
}
