use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ClientConfig;
use crate::transport::{BrokerConnector, ProducerHandle};

/// Lifecycle of the producer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection attempt has completed yet
    Uninitialized,
    /// A producer handle is available
    Ready,
    /// The last attempt failed or the handle was invalidated
    Failed,
}

/// Producer handle together with its state
struct ProducerSlot {
    state: ConnectionState,
    handle: Option<Arc<dyn ProducerHandle>>,
    /// Bumped every time a new handle is installed
    generation: u64,
}

/// Point-in-time view of the producer connection
#[derive(Clone)]
pub struct ProducerSnapshot {
    pub handle: Option<Arc<dyn ProducerHandle>>,
    pub generation: u64,
}

/// Owns the single outbound producer connection.
///
/// Construction never fails: when the broker is unreachable the manager comes
/// up `Failed` and can be reinitialized later. Reinitialization swaps the
/// handle in one step, so readers never observe a half-built producer.
pub struct ConnectionManager {
    connector: Arc<dyn BrokerConnector>,
    config: Arc<ClientConfig>,
    slot: RwLock<ProducerSlot>,
    reinit_lock: Mutex<()>,
    reinit_attempts: AtomicU64,
}

impl ConnectionManager {
    /// Create the manager and make the first connection attempt
    pub async fn initialize(connector: Arc<dyn BrokerConnector>, config: Arc<ClientConfig>) -> Self {
        let manager = Self {
            connector,
            config,
            slot: RwLock::new(ProducerSlot {
                state: ConnectionState::Uninitialized,
                handle: None,
                generation: 0,
            }),
            reinit_lock: Mutex::new(()),
            reinit_attempts: AtomicU64::new(0),
        };

        {
            let _guard = manager.reinit_lock.lock().await;
            manager.connect().await;
        }
        manager
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.slot.read().state
    }

    /// Whether a producer handle is installed
    pub fn is_ready(&self) -> bool {
        self.slot.read().handle.is_some()
    }

    /// Current producer handle, if any
    pub fn producer(&self) -> Option<Arc<dyn ProducerHandle>> {
        self.slot.read().handle.clone()
    }

    /// Handle and generation read under one lock
    pub fn snapshot(&self) -> ProducerSnapshot {
        let slot = self.slot.read();
        ProducerSnapshot {
            handle: slot.handle.clone(),
            generation: slot.generation,
        }
    }

    /// Number of reinitialization attempts made so far
    pub fn reinit_attempts(&self) -> u64 {
        self.reinit_attempts.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Repeat the bounded connection attempt and install the new handle
    pub async fn reinitialize(&self) -> ConnectionState {
        self.reinitialize_after(None).await
    }

    /// Reinitialize unless another caller already replaced the handle that
    /// `observed_generation` refers to.
    pub(crate) async fn reinitialize_after(&self, observed_generation: Option<u64>) -> ConnectionState {
        let _guard = self.reinit_lock.lock().await;

        if let Some(observed) = observed_generation {
            let slot = self.slot.read();
            if slot.generation != observed && slot.state == ConnectionState::Ready {
                debug!(
                    "Producer already reinitialized (generation {} -> {}), skipping",
                    observed, slot.generation
                );
                return slot.state;
            }
        }

        self.reinit_attempts.fetch_add(1, Ordering::SeqCst);
        info!("Attempting to reconnect to Kafka...");
        self.connect().await
    }

    /// Drop the current handle and mark the connection `Failed`
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        if slot.handle.take().is_some() {
            warn!("Producer connection invalidated");
        }
        slot.state = ConnectionState::Failed;
    }

    /// Invalidate only if the handle of `generation` is still installed
    pub(crate) fn invalidate_generation(&self, generation: u64) {
        let mut slot = self.slot.write();
        if slot.generation == generation {
            slot.handle = None;
            slot.state = ConnectionState::Failed;
        }
    }

    /// Flush in-flight records and release the producer
    pub async fn close(&self) {
        let handle = {
            let mut slot = self.slot.write();
            slot.state = ConnectionState::Uninitialized;
            slot.handle.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.flush(self.config.ack_timeout()).await {
                warn!("Failed to flush producer on close: {}", e);
            }
            info!("Producer connection closed");
        }
    }

    /// One bounded connection attempt. Callers hold `reinit_lock`.
    #[instrument(skip(self), fields(transport = self.connector.name()))]
    async fn connect(&self) -> ConnectionState {
        let attempt = timeout(
            self.config.connect_timeout(),
            self.connector.connect_producer(&self.config),
        )
        .await;

        let mut slot = self.slot.write();
        match attempt {
            Ok(Ok(handle)) => {
                slot.handle = Some(handle);
                slot.state = ConnectionState::Ready;
                slot.generation += 1;
                info!(
                    "Kafka producer initialized with bootstrap servers: {}",
                    self.config.bootstrap_servers
                );
            }
            Ok(Err(e)) => {
                slot.handle = None;
                slot.state = ConnectionState::Failed;
                error!("Failed to initialize Kafka producer: {}", e);
            }
            Err(_) => {
                slot.handle = None;
                slot.state = ConnectionState::Failed;
                error!(
                    "Failed to initialize Kafka producer: timed out after {}ms",
                    self.config.connect_timeout_ms
                );
            }
        }
        slot.state
    }
}

#[cfg(test)]
mod tests;
