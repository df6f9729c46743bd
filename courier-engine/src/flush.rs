//! Flush engine.
//!
//! On-demand batch delivery of accumulated events, per user or global.
//! Each user is processed against a consistent snapshot: the events and
//! enabled subscriptions are read once, every subscription gets the rendered
//! aggregate, and clearing is bounded by the snapshot's maximum timestamp so
//! events arriving mid-flush survive.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use courier_core::DeliveryErrorStrategy;
use courier_store::{EventFilter, EventStore, StoreError};

use crate::aggregate::render;
use crate::delivery::DeliveryService;

/// Parameters of one flush invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FlushRequest {
    /// Restrict the flush to one user; `None` flushes every user with
    /// undelivered events.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Report what would happen without delivering or clearing.
    #[serde(default)]
    pub dry_run: bool,
    /// Clear events even when every delivery failed.
    #[serde(default)]
    pub force_delivery: bool,
}

impl FlushRequest {
    /// A non-forced, non-dry flush of every user.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A non-forced, non-dry flush of one user.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }
}

/// Result of one flush invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Users that had undelivered events in scope.
    pub users_processed: u64,
    /// Successful per-subscription deliveries.
    pub messages_delivered: u64,
    /// Failed per-subscription deliveries.
    pub messages_failed: u64,
    /// Events removed from the store.
    pub events_cleared: u64,
    /// Human-readable failure descriptions.
    pub errors: Vec<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

/// Delivers and clears accumulated events on demand.
pub struct FlushEngine {
    store: Arc<dyn EventStore>,
    delivery: Arc<DeliveryService>,
    sender: String,
}

impl FlushEngine {
    /// Creates a flush engine sending with the given From identity.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        delivery: Arc<DeliveryService>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            store,
            delivery,
            sender: sender.into(),
        }
    }

    /// Runs one flush pass.
    ///
    /// A failure for one user never aborts the others; per-user errors are
    /// collected into the report. The engine never retries inline; retries
    /// happen on the next flush call.
    ///
    /// # Errors
    ///
    /// Returns an error only when the working user set cannot be read.
    pub async fn flush(&self, request: &FlushRequest) -> Result<FlushReport, StoreError> {
        let correlation_id = correlation_id(request.user_id.as_deref());
        let mut report = FlushReport {
            dry_run: request.dry_run,
            ..FlushReport::default()
        };

        let users = match &request.user_id {
            Some(user_id) => vec![user_id.clone()],
            None => self.store.users_with_undelivered().await?,
        };

        info!(
            correlation_id = %correlation_id,
            users = users.len(),
            dry_run = request.dry_run,
            force_delivery = request.force_delivery,
            "starting flush"
        );

        for user_id in users {
            if let Err(e) = self
                .flush_user(&user_id, request, &correlation_id, &mut report)
                .await
            {
                error!(
                    user_id = %user_id,
                    error = %e,
                    correlation_id = %correlation_id,
                    "flush failed for user"
                );
                report.errors.push(format!("user {user_id}: {e}"));
            }
        }

        info!(
            correlation_id = %correlation_id,
            users_processed = report.users_processed,
            messages_delivered = report.messages_delivered,
            messages_failed = report.messages_failed,
            events_cleared = report.events_cleared,
            "flush completed"
        );

        Ok(report)
    }

    async fn flush_user(
        &self,
        user_id: &str,
        request: &FlushRequest,
        correlation_id: &str,
        report: &mut FlushReport,
    ) -> Result<(), StoreError> {
        // Snapshot: events are ordered ascending, so the last one carries
        // the maximum timestamp this flush is allowed to clear.
        let events = self
            .store
            .get_undelivered_events(&EventFilter::for_user(user_id))
            .await?;
        let Some(last) = events.last() else {
            return Ok(());
        };
        let snapshot_max = last.timestamp;

        report.users_processed += 1;

        let subscriptions = self.store.enabled_subscriptions(user_id).await?;
        if subscriptions.is_empty() {
            warn!(
                user_id = %user_id,
                undelivered = events.len(),
                correlation_id = %correlation_id,
                "no enabled subscriptions, retaining events"
            );
            return Ok(());
        }

        let mut any_delivered = false;
        let mut any_failed = false;

        for subscription in &subscriptions {
            let mut rendered = render(user_id, &events, subscription.aggregation_method);
            if let Some(subject) = &subscription.aggregated_message_subject {
                rendered.subject = subject.clone();
            }

            if request.dry_run {
                continue;
            }

            let outcome = self
                .delivery
                .deliver(subscription, &rendered, &self.sender, correlation_id)
                .await;
            if outcome.is_delivered() {
                report.messages_delivered += 1;
                any_delivered = true;
            } else {
                report.messages_failed += 1;
                any_failed = true;
                report.errors.push(format!(
                    "delivery failed for user {user_id} subscription {}: {}",
                    subscription.subscription_id,
                    outcome.failure_reason().unwrap_or("unknown error"),
                ));
            }
        }

        if request.dry_run {
            return Ok(());
        }

        let all_ignore = subscriptions
            .iter()
            .all(|s| s.delivery_error_strategy == DeliveryErrorStrategy::Ignore);
        let should_clear =
            request.force_delivery || any_delivered || (any_failed && all_ignore);

        if should_clear {
            let cleared = self.store.clear_events(user_id, snapshot_max).await?;
            report.events_cleared += cleared;
            info!(
                user_id = %user_id,
                events_cleared = cleared,
                correlation_id = %correlation_id,
                "events cleared after flush"
            );
        }

        Ok(())
    }
}

/// Builds the `flush-<user|all>-<unix_seconds>` correlation id that tags
/// every log line of one flush invocation.
fn correlation_id(user_id: Option<&str>) -> String {
    format!(
        "flush-{}-{}",
        user_id.unwrap_or("all"),
        Utc::now().timestamp()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryOutcome;
    use crate::testing::{event, subscription, InsertingProvider, RecordingProvider};
    use courier_core::{AggregationFrequency, AggregationMethod, DeliveryMethod, EventType};
    use courier_store::MemoryEventStore;

    struct Harness {
        store: Arc<MemoryEventStore>,
        email: Arc<RecordingProvider>,
        webhook: Arc<RecordingProvider>,
        engine: FlushEngine,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryEventStore::new());
        let email = Arc::new(RecordingProvider::delivering());
        let webhook = Arc::new(RecordingProvider::delivering());
        let delivery = Arc::new(DeliveryService::with_providers(
            email.clone(),
            webhook.clone(),
        ));
        let engine = FlushEngine::new(
            store.clone() as Arc<dyn EventStore>,
            delivery,
            "courier@localhost",
        );
        Harness {
            store,
            email,
            webhook,
            engine,
        }
    }

    async fn seed_daily_email_user(harness: &Harness) {
        let mut sub = subscription(
            "s1",
            "u1",
            DeliveryMethod::Email,
            AggregationFrequency::Daily,
        );
        sub.aggregation_method = AggregationMethod::Html;
        harness.store.upsert_subscription(&sub).await.unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Notification, 0))
            .await
            .unwrap();
        harness
            .store
            .store_event(&event("e2", "u1", EventType::Notification, 5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_flush_delivers_and_clears() {
        let harness = harness();
        seed_daily_email_user(&harness).await;

        let report = harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(report.users_processed, 1);
        assert_eq!(report.messages_delivered, 1);
        assert_eq!(report.messages_failed, 0);
        assert_eq!(report.events_cleared, 2);
        assert!(report.errors.is_empty());
        assert_eq!(harness.store.event_count(), 0);

        let sent = harness.email.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].message.body.contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_flush_uses_aggregated_subject_override() {
        let harness = harness();
        let mut sub = subscription(
            "s1",
            "u1",
            DeliveryMethod::Email,
            AggregationFrequency::Daily,
        );
        sub.aggregated_message_subject = Some("Your digest".to_string());
        harness.store.upsert_subscription(&sub).await.unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Info, 0))
            .await
            .unwrap();

        harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(harness.email.sent()[0].message.subject, "Your digest");
    }

    #[tokio::test]
    async fn test_all_failed_retry_keeps_events() {
        let harness = harness();
        harness
            .webhook
            .set_default(DeliveryOutcome::Transient("HTTP 500".to_string()));
        harness
            .store
            .upsert_subscription(&subscription(
                "s1",
                "u1",
                DeliveryMethod::Slack,
                AggregationFrequency::Hourly,
            ))
            .await
            .unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Alert, 0))
            .await
            .unwrap();

        let report = harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.events_cleared, 0);
        assert!(!report.errors.is_empty());
        assert_eq!(harness.store.event_count(), 1);

        // Once the webhook recovers, the next flush delivers and clears.
        harness.webhook.set_default(DeliveryOutcome::Delivered);
        let report = harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();
        assert_eq!(report.messages_delivered, 1);
        assert_eq!(report.events_cleared, 1);
        assert_eq!(harness.store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_all_failed_ignore_clears() {
        let harness = harness();
        harness
            .webhook
            .set_default(DeliveryOutcome::Transient("HTTP 500".to_string()));
        let mut sub = subscription(
            "s1",
            "u1",
            DeliveryMethod::Slack,
            AggregationFrequency::Hourly,
        );
        sub.delivery_error_strategy = DeliveryErrorStrategy::Ignore;
        harness.store.upsert_subscription(&sub).await.unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Alert, 0))
            .await
            .unwrap();

        let report = harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.events_cleared, 1);
        assert_eq!(harness.store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_mixed_strategies_all_failed_keeps_events() {
        let harness = harness();
        harness
            .webhook
            .set_default(DeliveryOutcome::Transient("HTTP 500".to_string()));
        let retry = subscription(
            "s1",
            "u1",
            DeliveryMethod::Slack,
            AggregationFrequency::Hourly,
        );
        let mut ignore = subscription(
            "s2",
            "u1",
            DeliveryMethod::Slack,
            AggregationFrequency::Hourly,
        );
        ignore.delivery_error_strategy = DeliveryErrorStrategy::Ignore;
        harness.store.upsert_subscription(&retry).await.unwrap();
        harness.store.upsert_subscription(&ignore).await.unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Alert, 0))
            .await
            .unwrap();

        let report = harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(report.messages_failed, 2);
        assert_eq!(report.events_cleared, 0);
        assert_eq!(harness.store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_success_clears() {
        let harness = harness();
        harness.webhook.script([
            DeliveryOutcome::Transient("HTTP 500".to_string()),
            DeliveryOutcome::Delivered,
        ]);
        for id in ["s1", "s2"] {
            harness
                .store
                .upsert_subscription(&subscription(
                    id,
                    "u1",
                    DeliveryMethod::Slack,
                    AggregationFrequency::Hourly,
                ))
                .await
                .unwrap();
        }
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Alert, 0))
            .await
            .unwrap();

        let report = harness
            .engine
            .flush(&FlushRequest::for_user("u1"))
            .await
            .unwrap();

        assert_eq!(report.messages_delivered, 1);
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.events_cleared, 1);
    }

    #[tokio::test]
    async fn test_force_delivery_clears_despite_failures() {
        let harness = harness();
        harness
            .webhook
            .set_default(DeliveryOutcome::Transient("HTTP 500".to_string()));
        harness
            .store
            .upsert_subscription(&subscription(
                "s1",
                "u1",
                DeliveryMethod::Slack,
                AggregationFrequency::Hourly,
            ))
            .await
            .unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Alert, 0))
            .await
            .unwrap();
        harness
            .store
            .store_event(&event("e2", "u1", EventType::Alert, 1))
            .await
            .unwrap();

        let request = FlushRequest {
            user_id: Some("u1".to_string()),
            dry_run: false,
            force_delivery: true,
        };
        let report = harness.engine.flush(&request).await.unwrap();

        assert!(report.messages_failed > 0);
        assert_eq!(report.events_cleared, 2);
        assert_eq!(harness.store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let harness = harness();
        seed_daily_email_user(&harness).await;

        let request = FlushRequest {
            user_id: None,
            dry_run: true,
            force_delivery: false,
        };
        let report = harness.engine.flush(&request).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.users_processed, 1);
        assert_eq!(report.messages_delivered, 0);
        assert_eq!(report.events_cleared, 0);
        assert!(harness.email.sent().is_empty());
        assert_eq!(harness.store.event_count(), 2);
    }

    #[tokio::test]
    async fn test_no_subscriptions_retains_events() {
        let harness = harness();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Info, 0))
            .await
            .unwrap();

        let report = harness.engine.flush(&FlushRequest::all()).await.unwrap();

        assert_eq!(report.users_processed, 1);
        assert_eq!(report.messages_delivered, 0);
        assert_eq!(harness.store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_global_flush_isolates_user_failures() {
        let harness = harness();
        // u1 delivers over email; u2 fails over webhook with RETRY.
        harness
            .webhook
            .set_default(DeliveryOutcome::Transient("HTTP 500".to_string()));
        harness
            .store
            .upsert_subscription(&subscription(
                "s1",
                "u1",
                DeliveryMethod::Email,
                AggregationFrequency::Daily,
            ))
            .await
            .unwrap();
        harness
            .store
            .upsert_subscription(&subscription(
                "s2",
                "u2",
                DeliveryMethod::Slack,
                AggregationFrequency::Daily,
            ))
            .await
            .unwrap();
        harness
            .store
            .store_event(&event("e1", "u1", EventType::Info, 0))
            .await
            .unwrap();
        harness
            .store
            .store_event(&event("e2", "u2", EventType::Info, 1))
            .await
            .unwrap();

        let report = harness.engine.flush(&FlushRequest::all()).await.unwrap();

        assert_eq!(report.users_processed, 2);
        assert_eq!(report.messages_delivered, 1);
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.events_cleared, 1);
        assert!(harness.store.get_event("e2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_snapshot_consistency_mid_flush_insert_survives() {
        let store = Arc::new(MemoryEventStore::new());
        // While "delivering", this provider inserts a newer event for the
        // same user, as a concurrent publisher would.
        let late_event = event("late", "u1", EventType::Info, 30);
        let email = Arc::new(InsertingProvider {
            store: store.clone() as Arc<dyn EventStore>,
            event: late_event,
            inner: RecordingProvider::delivering(),
        });
        let delivery = Arc::new(DeliveryService::with_providers(
            email,
            Arc::new(RecordingProvider::delivering()),
        ));
        let engine = FlushEngine::new(
            store.clone() as Arc<dyn EventStore>,
            delivery,
            "courier@localhost",
        );

        store
            .upsert_subscription(&subscription(
                "s1",
                "u1",
                DeliveryMethod::Email,
                AggregationFrequency::Daily,
            ))
            .await
            .unwrap();
        store
            .store_event(&event("e1", "u1", EventType::Info, 0))
            .await
            .unwrap();

        let report = engine.flush(&FlushRequest::for_user("u1")).await.unwrap();

        // Only the snapshot was cleared; the mid-flush arrival survives.
        assert_eq!(report.events_cleared, 1);
        assert!(store.get_event("e1").await.unwrap().is_none());
        assert!(store.get_event("late").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_flush_for_user_without_events() {
        let harness = harness();
        let report = harness
            .engine
            .flush(&FlushRequest::for_user("nobody"))
            .await
            .unwrap();
        assert_eq!(report, FlushReport::default());
    }

    #[test]
    fn test_correlation_id_format() {
        let id = correlation_id(Some("u1"));
        assert!(id.starts_with("flush-u1-"));
        let id = correlation_id(None);
        assert!(id.starts_with("flush-all-"));
        // Suffix is the unix-seconds timestamp.
        let suffix = id.rsplit('-').next().unwrap();
        assert!(suffix.parse::<i64>().is_ok());
    }

    #[test]
    fn test_flush_request_deserialize_defaults() {
        let request: FlushRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, FlushRequest::all());

        let request: FlushRequest =
            serde_json::from_str(r#"{"user_id": "u1", "dry_run": true}"#).unwrap();
        assert_eq!(request.user_id.as_deref(), Some("u1"));
        assert!(request.dry_run);
        assert!(!request.force_delivery);
    }

    #[test]
    fn test_flush_report_serializes_all_fields() {
        let report = FlushReport {
            users_processed: 1,
            messages_delivered: 2,
            messages_failed: 3,
            events_cleared: 4,
            errors: vec!["boom".to_string()],
            dry_run: true,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["users_processed"], 1);
        assert_eq!(json["messages_delivered"], 2);
        assert_eq!(json["messages_failed"], 3);
        assert_eq!(json["events_cleared"], 4);
        assert_eq!(json["errors"][0], "boom");
        assert_eq!(json["dry_run"], true);
    }
}
