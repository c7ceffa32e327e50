//! Background consumer runners.
//!
//! A runner owns one subscription and feeds every message to a handler on its
//! own tokio task. Handler failures, including panics, are contained to the
//! message that caused them. Each runner carries a [`CancellationToken`] so it
//! can be stopped from outside.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::StartOffset;
use crate::consumer::{ConsumerFactory, Subscription};
use crate::error::ClientError;
use crate::message::Message;

/// Outcome of a single handler invocation
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives the messages of a runner
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, key: Option<String>, value: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Option<String>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, key: Option<String>, value: Value) -> HandlerResult {
        (self)(key, value).await
    }
}

/// Adapter for plain synchronous handlers, see [`sync_handler`]
#[derive(Clone)]
pub struct SyncHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for SyncHandler<F>
where
    F: Fn(Option<String>, Value) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, key: Option<String>, value: Value) -> HandlerResult {
        (self.0)(key, value)
    }
}

/// Wrap a synchronous `fn(key, value)` as a [`MessageHandler`]
pub fn sync_handler<F>(handler: F) -> SyncHandler<F>
where
    F: Fn(Option<String>, Value) -> HandlerResult + Send + Sync + 'static,
{
    SyncHandler(handler)
}

/// Runner lifecycle: `Starting -> Running -> Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerState {
    Starting,
    Running,
    Stopped,
}

/// Why a runner reached `Stopped`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// The consumer could not be created
    SetupFailed,
    /// The cancellation token fired
    Cancelled,
    /// The subscription ended on its own
    StreamEnded,
    /// Non-recoverable subscription error
    Failed(String),
}

#[derive(Debug, Default)]
struct RunnerMetrics {
    messages_received: AtomicU64,
    messages_handled: AtomicU64,
    handler_failures: AtomicU64,
    deserialization_failures: AtomicU64,
}

/// Per-runner counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub messages_received: u64,
    pub messages_handled: u64,
    pub handler_failures: u64,
    pub deserialization_failures: u64,
}

impl RunnerMetrics {
    fn snapshot(&self) -> RunnerStats {
        RunnerStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            deserialization_failures: self.deserialization_failures.load(Ordering::Relaxed),
        }
    }
}

/// Launches background consumers
#[derive(Clone)]
pub struct ConsumerRunner {
    factory: ConsumerFactory,
}

impl ConsumerRunner {
    pub fn new(factory: ConsumerFactory) -> Self {
        Self { factory }
    }

    /// Start a runner with the configured start offset and its own token
    pub fn start<H: MessageHandler>(&self, topic: &str, handler: H, group_id: Option<&str>) -> RunnerHandle {
        let start_offset = self.factory.config().consumer.start_offset;
        self.start_with(topic, handler, group_id, start_offset, CancellationToken::new())
    }

    /// Start a runner with an explicit start offset and cancellation token.
    ///
    /// The task is detached: dropping the returned handle leaves it running.
    pub fn start_with<H: MessageHandler>(
        &self,
        topic: &str,
        handler: H,
        group_id: Option<&str>,
        start_offset: StartOffset,
        token: CancellationToken,
    ) -> RunnerHandle {
        let id = format!("runner-{}", Uuid::new_v4());
        let (state_tx, state_rx) = watch::channel(RunnerState::Starting);
        let metrics = Arc::new(RunnerMetrics::default());

        let task = RunnerTask {
            factory: self.factory.clone(),
            topic: topic.to_string(),
            group_id: group_id.map(str::to_string),
            start_offset,
            handler: Arc::new(handler),
            token: token.clone(),
            state: state_tx,
            metrics: metrics.clone(),
        };

        let span = info_span!("consumer_runner", runner = %id, topic = %topic);
        let join = tokio::spawn(task.run().instrument(span));

        RunnerHandle {
            monitor: RunnerMonitor {
                id,
                topic: topic.to_string(),
                token,
                state: state_rx,
                metrics,
            },
            join,
        }
    }
}

struct RunnerTask {
    factory: ConsumerFactory,
    topic: String,
    group_id: Option<String>,
    start_offset: StartOffset,
    handler: Arc<dyn MessageHandler>,
    token: CancellationToken,
    state: watch::Sender<RunnerState>,
    metrics: Arc<RunnerMetrics>,
}

impl RunnerTask {
    async fn run(self) -> RunnerExit {
        let created = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                self.state.send_replace(RunnerState::Stopped);
                return RunnerExit::Cancelled;
            }
            created = self.factory.create_consumer(&self.topic, self.group_id.as_deref(), self.start_offset) => created,
        };

        let Some(mut subscription) = created else {
            warn!("Failed to create consumer for topic {}", self.topic);
            self.state.send_replace(RunnerState::Stopped);
            return RunnerExit::SetupFailed;
        };

        self.state.send_replace(RunnerState::Running);
        info!("Started consumer for topic {}", self.topic);

        let exit = self.consume(&mut subscription).await;

        subscription.close().await;
        self.state.send_replace(RunnerState::Stopped);
        info!("Consumer for topic {} stopped: {:?}", self.topic, exit);
        exit
    }

    async fn consume(&self, subscription: &mut Subscription) -> RunnerExit {
        let poll_timeout = self.factory.config().consumer.poll_timeout();

        loop {
            if self.token.is_cancelled() {
                return RunnerExit::Cancelled;
            }

            let polled = tokio::select! {
                biased;
                _ = self.token.cancelled() => return RunnerExit::Cancelled,
                polled = subscription.next_timeout(poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    self.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                    self.dispatch(message).await;
                }
                Ok(None) => continue,
                Err(ClientError::Deserialization(reason)) => {
                    self.metrics.deserialization_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping undecodable message on topic {}: {}", self.topic, reason);
                }
                Err(ClientError::Closed(_)) => return RunnerExit::StreamEnded,
                Err(e) => {
                    error!("Error in Kafka consumer: {}", e);
                    return RunnerExit::Failed(e.to_string());
                }
            }
        }
    }

    async fn dispatch(&self, message: Message) {
        let (key, value) = message.into_parts();
        let outcome = AssertUnwindSafe(self.handler.handle(key, value))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.metrics.messages_handled.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!("Error in message handler: {}", e);
            }
            Err(panic) => {
                self.metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!("Message handler panicked: {}", panic_message(panic.as_ref()));
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cloneable view of a runner: state, stats and cancellation
#[derive(Clone)]
pub struct RunnerMonitor {
    id: String,
    topic: String,
    token: CancellationToken,
    state: watch::Receiver<RunnerState>,
    metrics: Arc<RunnerMetrics>,
}

impl RunnerMonitor {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> RunnerStats {
        self.metrics.snapshot()
    }

    /// Request a stop; the runner exits after the message in flight
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait until the runner reaches `target` or a later state
    pub async fn wait_for(&self, target: RunnerState) -> RunnerState {
        let mut state = self.state.clone();
        let observed = match state.wait_for(|current| reached(*current, target)).await {
            Ok(current) => *current,
            // Sender dropped: the task is gone
            Err(_) => RunnerState::Stopped,
        };
        observed
    }

    /// Like [`RunnerMonitor::wait_for`] with an upper bound
    pub async fn wait_for_timeout(&self, target: RunnerState, wait: Duration) -> Option<RunnerState> {
        tokio::time::timeout(wait, self.wait_for(target)).await.ok()
    }
}

fn reached(current: RunnerState, target: RunnerState) -> bool {
    let rank = |state| match state {
        RunnerState::Starting => 0,
        RunnerState::Running => 1,
        RunnerState::Stopped => 2,
    };
    rank(current) >= rank(target)
}

/// Handle to a started runner
pub struct RunnerHandle {
    monitor: RunnerMonitor,
    join: JoinHandle<RunnerExit>,
}

impl std::fmt::Debug for RunnerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerHandle")
            .field("id", &self.monitor.id)
            .field("topic", &self.monitor.topic)
            .field("state", &self.monitor.state())
            .finish()
    }
}

impl RunnerHandle {
    pub fn id(&self) -> &str {
        self.monitor.id()
    }

    pub fn state(&self) -> RunnerState {
        self.monitor.state()
    }

    pub fn stats(&self) -> RunnerStats {
        self.monitor.stats()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub fn monitor(&self) -> RunnerMonitor {
        self.monitor.clone()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    /// Wait for the runner to exit on its own
    pub async fn join(self) -> RunnerExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => {
                debug!("Runner {} task ended abnormally: {}", self.monitor.id, e);
                RunnerExit::Failed(format!("runner task aborted: {}", e))
            }
        }
    }

    /// Cancel the runner and wait for it to exit
    pub async fn stop(self) -> RunnerExit {
        self.monitor.cancel();
        self.join().await
    }
}
