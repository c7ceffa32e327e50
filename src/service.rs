//! Messaging facade used by the web layer.

use activitymq_client::{KafkaClient, MessageHandler, RunnerHandle, RunnerMonitor, RunnerState};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Config, ServiceConfig};
use crate::events::{NotionEvent, UserActivityEvent, NOTION_EVENTS_TOPIC, USER_ACTIVITY_TOPIC};
use crate::handlers::LoggingHandler;

/// Publishes activity events and owns the background consumers configured at
/// startup. Publishing never fails the user action: every `record_*` method
/// reports delivery as a `bool`.
#[derive(Clone)]
pub struct ActivityService {
    client: KafkaClient,
    config: ServiceConfig,
    runners: Arc<Mutex<Vec<RunnerHandle>>>,
}

impl ActivityService {
    /// Start the configured consumers with the logging handler
    pub fn start(config: &Config, client: KafkaClient) -> Self {
        Self::start_with_handler(config, client, LoggingHandler)
    }

    /// Start the configured consumers, each with a clone of `handler`
    pub fn start_with_handler<H>(config: &Config, client: KafkaClient, handler: H) -> Self
    where
        H: MessageHandler + Clone,
    {
        let default_offset = client.config().consumer.start_offset;
        let runners = config
            .consumers
            .iter()
            .map(|spec| {
                info!(
                    "Launching consumer for topic {} (group {:?})",
                    spec.topic, spec.group_id
                );
                client.start_consumer_from(
                    &spec.topic,
                    handler.clone(),
                    spec.group_id.as_deref(),
                    spec.start_offset.unwrap_or(default_offset),
                )
            })
            .collect();

        Self {
            client,
            config: config.service.clone(),
            runners: Arc::new(Mutex::new(runners)),
        }
    }

    /// Publish a `user-activity` event such as `login` or `logout`
    pub async fn record_user_activity(&self, event_type: &str, username: &str) -> bool {
        let event = UserActivityEvent::new(event_type, username);
        let sent = self.client.send(USER_ACTIVITY_TOPIC, &event, None).await;
        if !sent {
            warn!(
                "User activity event {} for {} was not delivered",
                event_type, username
            );
        }
        sent
    }

    /// Publish a `notion-events` event
    pub async fn record_notion_event(&self, event: &NotionEvent) -> bool {
        let sent = self.client.send(NOTION_EVENTS_TOPIC, event, None).await;
        if !sent {
            warn!(
                "Notion event {} for {} was not delivered",
                event.event_type, event.username
            );
        }
        sent
    }

    /// Runners still consuming
    pub fn active_runners(&self) -> Vec<RunnerMonitor> {
        self.runners
            .lock()
            .iter()
            .map(RunnerHandle::monitor)
            .filter(|monitor| monitor.state() != RunnerState::Stopped)
            .collect()
    }

    pub fn client(&self) -> &KafkaClient {
        &self.client
    }

    /// Stop all consumers and close the producer
    pub async fn shutdown(&self) {
        info!("Stopping activity service");
        self.client.shutdown(self.config.shutdown_grace()).await;

        self.runners.lock().clear();
        info!("Activity service stopped");
    }
}
