//! Test doubles shared across the engine test modules.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use courier_core::{
    AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod, Event,
    EventType, Subscription,
};
use courier_store::EventStore;

use crate::aggregate::RenderedMessage;
use crate::delivery::{DeliveryOutcome, DeliveryProvider};

/// One captured send.
#[derive(Debug, Clone)]
pub(crate) struct SentMessage {
    pub subscription_id: String,
    pub message: RenderedMessage,
    pub sender: String,
}

/// Provider double that records sends and replays scripted outcomes.
pub(crate) struct RecordingProvider {
    scripted: Mutex<VecDeque<DeliveryOutcome>>,
    default_outcome: Mutex<DeliveryOutcome>,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingProvider {
    pub fn delivering() -> Self {
        Self::with_default(DeliveryOutcome::Delivered)
    }

    pub fn failing_transiently(reason: &str) -> Self {
        Self::with_default(DeliveryOutcome::Transient(reason.to_string()))
    }

    fn with_default(outcome: DeliveryOutcome) -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(outcome),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues outcomes consumed one per send before the default applies.
    pub fn script(&self, outcomes: impl IntoIterator<Item = DeliveryOutcome>) {
        self.scripted.lock().extend(outcomes);
    }

    /// Replaces the default outcome, e.g. to let a failing webhook recover.
    pub fn set_default(&self, outcome: DeliveryOutcome) {
        *self.default_outcome.lock() = outcome;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DeliveryProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(
        &self,
        subscription: &Subscription,
        message: &RenderedMessage,
        sender: &str,
    ) -> DeliveryOutcome {
        self.sent.lock().push(SentMessage {
            subscription_id: subscription.subscription_id.clone(),
            message: message.clone(),
            sender: sender.to_string(),
        });
        self.scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.lock().clone())
    }
}

/// Provider double that writes an event into a store while "delivering",
/// simulating an event arriving mid-flush.
pub(crate) struct InsertingProvider {
    pub store: Arc<dyn EventStore>,
    pub event: Event,
    pub inner: RecordingProvider,
}

#[async_trait]
impl DeliveryProvider for InsertingProvider {
    fn name(&self) -> &'static str {
        "inserting"
    }

    async fn send(
        &self,
        subscription: &Subscription,
        message: &RenderedMessage,
        sender: &str,
    ) -> DeliveryOutcome {
        self.store
            .store_event(&self.event)
            .await
            .expect("mid-flush insert failed");
        self.inner.send(subscription, message, sender).await
    }
}

pub(crate) fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 10, minute, 0).unwrap()
}

pub(crate) fn event(id: &str, user: &str, event_type: EventType, minute: u32) -> Event {
    Event::new(id, user, event_type, "the message", "pub@example.org", "the subject", ts(minute))
}

pub(crate) fn subscription(
    id: &str,
    user: &str,
    method: DeliveryMethod,
    frequency: AggregationFrequency,
) -> Subscription {
    let (email_address, slack_webhook_url) = match method {
        DeliveryMethod::Email => (Some(format!("{user}@example.org")), None),
        DeliveryMethod::Slack => (None, Some("https://hooks.example.org/T1".to_string())),
    };
    Subscription {
        subscription_id: id.to_string(),
        user_id: user.to_string(),
        delivery_method: method,
        aggregation_frequency: frequency,
        aggregation_method: AggregationMethod::Plain,
        delivery_error_strategy: DeliveryErrorStrategy::Retry,
        delivery_time: "09:00".to_string(),
        timezone: "UTC".to_string(),
        email_address,
        slack_webhook_url,
        aggregated_message_subject: None,
        enabled: true,
    }
}
