use activitymq_client::{HandlerResult, MessageHandler};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// `Received message [key]: value`, or `Received message : value` without a key
pub fn format_message(key: Option<&str>, value: &Value) -> String {
    let key = key.map(|k| format!("[{}]", k)).unwrap_or_default();
    format!("Received message {}: {}", key, value)
}

pub fn log_message(key: Option<&str>, value: &Value) {
    info!("{}", format_message(key, value));
}

/// Handler that writes every message to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, key: Option<String>, value: Value) -> HandlerResult {
        log_message(key.as_deref(), &value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_with_key() {
        let line = format_message(Some("alice"), &json!({"event_type": "login"}));
        assert_eq!(line, r#"Received message [alice]: {"event_type":"login"}"#);
    }

    #[test]
    fn test_format_without_key() {
        let line = format_message(None, &json!(42));
        assert_eq!(line, "Received message : 42");
    }

    #[tokio::test]
    async fn test_logging_handler_never_fails() {
        let result = LoggingHandler.handle(None, json!({"n": 1})).await;
        assert!(result.is_ok());
    }
}
