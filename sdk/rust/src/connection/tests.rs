use super::*;
use crate::memory::InMemoryBroker;
use crate::transport::ProducerHandle;
use crate::message::OutboundRecord;
use std::time::Duration;

fn test_config() -> Arc<ClientConfig> {
    Arc::new(ClientConfig {
        connect_timeout_ms: 500,
        ..Default::default()
    })
}

async fn manager_for(broker: &InMemoryBroker) -> ConnectionManager {
    ConnectionManager::initialize(Arc::new(broker.clone()), test_config()).await
}

#[tokio::test]
async fn test_initialize_with_reachable_broker() {
    let broker = InMemoryBroker::new();
    let manager = manager_for(&broker).await;

    assert_eq!(manager.state(), ConnectionState::Ready);
    assert!(manager.is_ready());
    assert_eq!(manager.reinit_attempts(), 0);
    assert_eq!(broker.producer_connects(), 1);
}

#[tokio::test]
async fn test_initialize_with_unreachable_broker_is_not_fatal() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);

    let manager = manager_for(&broker).await;

    assert_eq!(manager.state(), ConnectionState::Failed);
    assert!(manager.producer().is_none());
}

#[tokio::test]
async fn test_reinitialize_recovers_after_outage() {
    let broker = InMemoryBroker::new();
    broker.set_available(false);
    let manager = manager_for(&broker).await;
    assert_eq!(manager.state(), ConnectionState::Failed);

    // Still down: stays failed, attempt is counted
    assert_eq!(manager.reinitialize().await, ConnectionState::Failed);
    assert_eq!(manager.reinit_attempts(), 1);

    broker.set_available(true);
    assert_eq!(manager.reinitialize().await, ConnectionState::Ready);
    assert_eq!(manager.reinit_attempts(), 2);
    assert!(manager.producer().is_some());
}

#[tokio::test]
async fn test_invalidate_clears_handle() {
    let broker = InMemoryBroker::new();
    let manager = manager_for(&broker).await;

    manager.invalidate();
    assert_eq!(manager.state(), ConnectionState::Failed);
    assert!(manager.producer().is_none());
}

#[tokio::test]
async fn test_stale_generation_does_not_reconnect_twice() {
    let broker = InMemoryBroker::new();
    let manager = manager_for(&broker).await;
    let stale = manager.snapshot().generation;

    manager.invalidate_generation(stale);
    assert_eq!(manager.reinitialize_after(Some(stale)).await, ConnectionState::Ready);
    assert_eq!(manager.reinit_attempts(), 1);

    // A second caller that saw the same failure finds the fresh handle
    assert_eq!(manager.reinitialize_after(Some(stale)).await, ConnectionState::Ready);
    assert_eq!(manager.reinit_attempts(), 1);
    assert_eq!(broker.producer_connects(), 2);

    // Invalidating an old generation leaves the new handle alone
    manager.invalidate_generation(stale);
    assert!(manager.is_ready());
}

#[tokio::test]
async fn test_concurrent_reinitialize_is_serialized() {
    let broker = InMemoryBroker::new();
    let manager = Arc::new(manager_for(&broker).await);
    let stale = manager.snapshot().generation;
    manager.invalidate_generation(stale);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.reinitialize_after(Some(stale)).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), ConnectionState::Ready);
    }

    assert_eq!(manager.reinit_attempts(), 1);
}

/// Connector whose handshake never completes
struct HangingConnector;

#[async_trait::async_trait]
impl BrokerConnector for HangingConnector {
    async fn connect_producer(&self, _config: &ClientConfig) -> crate::Result<Arc<dyn ProducerHandle>> {
        std::future::pending().await
    }

    async fn connect_consumer(
        &self,
        _config: &ClientConfig,
        _subscription: &crate::transport::SubscriptionSpec,
    ) -> crate::Result<Box<dyn crate::transport::ConsumerHandle>> {
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "hanging"
    }
}

#[tokio::test(start_paused = true)]
async fn test_connect_attempt_is_bounded() {
    let manager = ConnectionManager::initialize(Arc::new(HangingConnector), test_config()).await;
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_close_releases_producer() {
    let broker = InMemoryBroker::new();
    let manager = manager_for(&broker).await;
    let handle = manager.producer().unwrap();

    handle
        .send(
            OutboundRecord {
                topic: "t".to_string(),
                key: None,
                payload: b"{}".to_vec(),
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Uninitialized);
    assert!(manager.producer().is_none());
}
