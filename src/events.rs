//! Payloads published on the activity topics.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const USER_ACTIVITY_TOPIC: &str = "user-activity";
pub const NOTION_EVENTS_TOPIC: &str = "notion-events";

/// Username used by the sample messages of the producer tool
pub const SAMPLE_USERNAME: &str = "test_user";

/// A user action such as a login, logout or profile change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivityEvent {
    pub event_type: String,
    pub username: String,
    pub timestamp: String,
}

impl UserActivityEvent {
    pub fn new(event_type: &str, username: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            username: username.to_string(),
            timestamp: timestamp_now(),
        }
    }
}

/// A Notion workspace event. Successful events carry the page, failed ones
/// carry `error` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotionEvent {
    pub event_type: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl NotionEvent {
    pub fn page(event_type: &str, username: &str, page_id: &str, page_title: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            username: username.to_string(),
            page_id: Some(page_id.to_string()),
            page_title: Some(page_title.to_string()),
            error: None,
            timestamp: timestamp_now(),
        }
    }

    pub fn failure(event_type: &str, username: &str, error: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            username: username.to_string(),
            page_id: None,
            page_title: None,
            error: Some(error.to_string()),
            timestamp: timestamp_now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Local wall-clock time, e.g. `2024-05-01 12:30:45.123456`
pub fn timestamp_now() -> String {
    format_timestamp(Local::now())
}

fn format_timestamp(at: DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Default payload the producer tool sends to `topic`
pub fn sample_message(topic: &str, message_type: Option<&str>) -> Value {
    let sample = match topic {
        USER_ACTIVITY_TOPIC => serde_json::to_value(UserActivityEvent::new(
            message_type.unwrap_or("login"),
            SAMPLE_USERNAME,
        )),
        NOTION_EVENTS_TOPIC => serde_json::to_value(NotionEvent::page(
            message_type.unwrap_or("page_activated"),
            SAMPLE_USERNAME,
            "123456789abcdef",
            "Test Page",
        )),
        _ => Ok(custom_message(message_type.unwrap_or("custom"))),
    };

    // Both event types are plain string records
    sample.unwrap_or_else(|_| custom_message(message_type.unwrap_or("custom")))
}

fn custom_message(event_type: &str) -> Value {
    json!({
        "event_type": event_type,
        "message": "Test message",
        "timestamp": timestamp_now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_user_activity_sample() {
        let value = sample_message(USER_ACTIVITY_TOPIC, None);
        assert_eq!(value["event_type"], "login");
        assert_eq!(value["username"], SAMPLE_USERNAME);
        assert!(value["timestamp"].is_string());

        let event: UserActivityEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event.event_type, "login");
    }

    #[test]
    fn test_notion_sample_with_message_type() {
        let value = sample_message(NOTION_EVENTS_TOPIC, Some("page_deactivated"));
        assert_eq!(value["event_type"], "page_deactivated");
        assert_eq!(value["page_id"], "123456789abcdef");
        assert_eq!(value["page_title"], "Test Page");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_custom_topic_sample() {
        let value = sample_message("audit", None);
        assert_eq!(value["event_type"], "custom");
        assert_eq!(value["message"], "Test message");
    }

    #[test]
    fn test_notion_failure_omits_page_fields() {
        let event = NotionEvent::failure("token_invalid", "alice", "Invalid token");
        let value = serde_json::to_value(&event).unwrap();

        assert!(event.is_failure());
        assert_eq!(value["error"], "Invalid token");
        assert!(value.get("page_id").is_none());
        assert!(value.get("page_title").is_none());

        let back: NotionEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        assert_eq!(format_timestamp(at), "2024-05-01 12:30:45.000000");
    }
}
