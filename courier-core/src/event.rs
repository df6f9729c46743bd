//! Event types for the notification pipeline.
//!
//! An [`Event`] is one notification record created by an upstream publisher.
//! Events are immutable once created; the service routes, stores, and
//! delivers them but never rewrites their fields.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an event, used for filtering and per-type aggregation
/// sections.
///
/// Serialized with the upper-case wire names (`NOTIFICATION`, `ALERT`,
/// `WARNING`, `INFO`); unknown values are rejected at the parse boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// General notification.
    Notification,
    /// Alert requiring attention.
    Alert,
    /// Warning condition.
    Warning,
    /// Informational message.
    Info,
}

impl EventType {
    /// All event types, in a stable order.
    pub const ALL: [Self; 4] = [Self::Notification, Self::Alert, Self::Warning, Self::Info];

    /// Returns the upper-case wire name of this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "NOTIFICATION",
            Self::Alert => "ALERT",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }

    /// Parses the upper-case wire name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NOTIFICATION" => Some(Self::Notification),
            "ALERT" => Some(Self::Alert),
            "WARNING" => Some(Self::Warning),
            "INFO" => Some(Self::Info),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification record published by an upstream system.
///
/// An event is *undelivered* iff it is present in the event store; presence,
/// not a flag, is the ground truth. `timestamp` is assigned by the publisher
/// and never rewritten by the service. `metadata` is opaque to routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier (primary key in the events collection).
    pub event_id: String,
    /// Recipient identifier.
    pub user_id: String,
    /// Event classification.
    pub event_type: EventType,
    /// Free-form text payload.
    pub message: String,
    /// Publisher identity, by convention an email address.
    pub sender: String,
    /// Short subject line.
    pub subject: String,
    /// Publisher-assigned UTC instant.
    pub timestamp: DateTime<Utc>,
    /// Opaque key-value annotations.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Creates an event with empty metadata.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: EventType,
        message: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            user_id: user_id.into(),
            event_type,
            message: message.into(),
            sender: sender.into(),
            subject: subject.into(),
            timestamp,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns a copy of this event re-keyed for one fan-out target.
    ///
    /// Multi-recipient envelopes expand into one stored event per user; the
    /// derived id `<event_id>-<user_id>` keeps `event_id` unique across the
    /// events collection while remaining stable across redeliveries.
    #[must_use]
    pub fn for_user(&self, user_id: &str) -> Self {
        let mut event = self.clone();
        event.event_id = format!("{}-{}", self.event_id, user_id);
        event.user_id = user_id.to_string();
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::Notification.as_str(), "NOTIFICATION");
        assert_eq!(EventType::parse("ALERT"), Some(EventType::Alert));
        assert_eq!(EventType::parse("alert"), None);
        assert_eq!(EventType::parse("BOGUS"), None);
    }

    #[test]
    fn test_event_type_serde() {
        let json = serde_json::to_string(&EventType::Warning).unwrap();
        assert_eq!(json, "\"WARNING\"");

        let parsed: EventType = serde_json::from_str("\"INFO\"").unwrap();
        assert_eq!(parsed, EventType::Info);

        assert!(serde_json::from_str::<EventType>("\"CRITICAL\"").is_err());
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = Event::new(
            "evt-1",
            "u1",
            EventType::Alert,
            "disk almost full",
            "ops@example.org",
            "Disk alert",
            ts(),
        )
        .with_metadata("host", serde_json::json!("web-3"));

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_metadata_defaults_empty() {
        let json = r#"{
            "event_id": "evt-1",
            "user_id": "u1",
            "event_type": "INFO",
            "message": "hello",
            "sender": "a@x",
            "subject": "hi",
            "timestamp": "2024-05-17T10:30:00Z"
        }"#;
        let parsed: Event = serde_json::from_str(json).unwrap();
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_for_user_derives_id() {
        let event = Event::new("evt-1", "", EventType::Info, "m", "s@x", "subj", ts());
        let derived = event.for_user("u2");
        assert_eq!(derived.event_id, "evt-1-u2");
        assert_eq!(derived.user_id, "u2");
        assert_eq!(derived.timestamp, event.timestamp);
    }
}
