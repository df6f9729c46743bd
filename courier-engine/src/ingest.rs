//! Ingestion processor.
//!
//! Consumes inbound messages with bounded concurrency and routes each event
//! per subscription: immediate delivery through a provider, or persistence
//! for a later flush. A message is acked only after every target user has
//! been handled; any failure nacks it and the transport redelivers, with
//! `store_event` idempotency absorbing the duplicates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use courier_core::{
    AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod, Event,
    Subscription,
};
use courier_store::{EventStore, StoreError};

use crate::aggregate::{render, ContentKind, RenderedMessage};
use crate::delivery::{DeliveryOutcome, DeliveryService};
use crate::envelope::{Envelope, EnvelopeTarget};
use crate::source::{InboundMessage, MessageSource};

/// Flow-control ceiling: messages processed concurrently. Additional
/// messages wait at the transport.
pub const MAX_IN_FLIGHT: usize = 100;

/// The ingestion side of the engine.
pub struct IngestProcessor {
    store: Arc<dyn EventStore>,
    delivery: Arc<DeliveryService>,
    default_sender: String,
}

impl IngestProcessor {
    /// Creates a processor over the given store and delivery service.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        delivery: Arc<DeliveryService>,
        default_sender: impl Into<String>,
    ) -> Self {
        Self {
            store,
            delivery,
            default_sender: default_sender.into(),
        }
    }

    /// Runs the ingestion loop until shutdown or source exhaustion.
    ///
    /// On shutdown the loop stops pulling, waits up to `grace` for in-flight
    /// messages, then aborts the rest; aborted messages nack themselves and
    /// return to the transport.
    pub async fn run(
        self: Arc<Self>,
        mut source: Box<dyn MessageSource>,
        mut shutdown: broadcast::Receiver<()>,
        grace: Duration,
    ) {
        let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!(max_in_flight = MAX_IN_FLIGHT, "ingestion loop started");

        loop {
            // Take the slot before pulling so excess messages stay with the
            // transport's flow control.
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let message = tokio::select! {
                _ = shutdown.recv() => break,
                maybe = source.recv() => match maybe {
                    Some(message) => message,
                    None => break,
                },
            };

            let processor = Arc::clone(&self);
            tasks.spawn(async move {
                let _permit = permit;
                processor.process_message(message).await;
            });
            // Reap whatever already finished; panicked tasks nack their
            // message through the drop path.
            while tasks.try_join_next().is_some() {}
        }

        drop(source);
        info!(in_flight = tasks.len(), "ingestion loop stopping");

        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("shutdown grace period elapsed, nacking in-flight messages");
            tasks.shutdown().await;
        }
        info!("ingestion loop stopped");
    }

    /// Handles one inbound message end to end, resolving its ack state.
    pub async fn process_message(&self, message: InboundMessage) {
        let mut correlation_id = Uuid::new_v4().simple().to_string();
        correlation_id.truncate(8);

        let envelope = match Envelope::parse(message.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Poison message: redelivery cannot fix it.
                warn!(
                    error = %e,
                    attempt = message.attempt(),
                    correlation_id = %correlation_id,
                    "discarding undeliverable message"
                );
                message.ack();
                return;
            }
        };

        match envelope.target() {
            Ok(EnvelopeTarget::EmailGateway(address)) => {
                self.process_gateway(&envelope, &address, &correlation_id, message)
                    .await;
            }
            Ok(EnvelopeTarget::Users(users)) => {
                self.process_users(&envelope, &users, &correlation_id, message)
                    .await;
            }
            Err(e) => {
                warn!(error = %e, correlation_id = %correlation_id, "discarding untargeted message");
                message.ack();
            }
        }
    }

    /// Gateway mode: one direct email, bypassing subscription lookup and
    /// the store.
    async fn process_gateway(
        &self,
        envelope: &Envelope,
        address: &str,
        correlation_id: &str,
        message: InboundMessage,
    ) {
        info!(
            event_id = %envelope.event_id,
            email_to = %address,
            correlation_id = %correlation_id,
            "processing email gateway message"
        );

        let subscription = gateway_subscription(address);
        let rendered = RenderedMessage {
            subject: if envelope.subject.is_empty() {
                "Notification".to_string()
            } else {
                envelope.subject.clone()
            },
            body: envelope.message.clone(),
            content: ContentKind::Plain,
        };
        let sender = self.sender_for(&envelope.sender);

        match self
            .delivery
            .deliver(&subscription, &rendered, sender, correlation_id)
            .await
        {
            DeliveryOutcome::Transient(_) => message.nack(),
            DeliveryOutcome::Delivered | DeliveryOutcome::Permanent(_) => message.ack(),
        }
    }

    async fn process_users(
        &self,
        envelope: &Envelope,
        users: &[String],
        correlation_id: &str,
        message: InboundMessage,
    ) {
        info!(
            event_id = %envelope.event_id,
            user_count = users.len(),
            attempt = message.attempt(),
            correlation_id = %correlation_id,
            "processing event"
        );

        let mut failed = 0usize;
        for user_id in users {
            if let Err(e) = self.process_user(envelope, user_id, correlation_id).await {
                error!(
                    user_id = %user_id,
                    event_id = %envelope.event_id,
                    error = %e,
                    correlation_id = %correlation_id,
                    "failed to process event for user"
                );
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(
                event_id = %envelope.event_id,
                failed,
                total = users.len(),
                correlation_id = %correlation_id,
                "some users failed, message will be redelivered"
            );
            message.nack();
        } else {
            message.ack();
        }
    }

    async fn process_user(
        &self,
        envelope: &Envelope,
        user_id: &str,
        correlation_id: &str,
    ) -> Result<(), StoreError> {
        let event = envelope.event_for(user_id);
        let subscriptions = self.store.enabled_subscriptions(user_id).await?;

        if subscriptions.is_empty() {
            // Subscribers may be created later; a flush will pick it up.
            debug!(
                user_id = %user_id,
                event_id = %event.event_id,
                correlation_id = %correlation_id,
                "no enabled subscriptions, storing event"
            );
            self.store.store_event(&event).await?;
            return Ok(());
        }

        let mut stored = false;
        for subscription in &subscriptions {
            if subscription.aggregation_frequency.is_deferred() {
                if !stored {
                    self.store.store_event(&event).await?;
                    stored = true;
                }
                continue;
            }

            let rendered = render_single(&event, subscription.aggregation_method);
            let sender = self.sender_for(&event.sender);
            match self
                .delivery
                .deliver(subscription, &rendered, sender, correlation_id)
                .await
            {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Transient(_) => match subscription.delivery_error_strategy {
                    DeliveryErrorStrategy::Retry => {
                        // Retained for the next flush instead of blocking
                        // the whole message on redelivery.
                        if !stored {
                            self.store.store_event(&event).await?;
                            stored = true;
                        }
                    }
                    DeliveryErrorStrategy::Ignore => {
                        debug!(
                            subscription_id = %subscription.subscription_id,
                            event_id = %event.event_id,
                            correlation_id = %correlation_id,
                            "transient failure ignored per subscription strategy"
                        );
                    }
                },
                DeliveryOutcome::Permanent(reason) => {
                    error!(
                        subscription_id = %subscription.subscription_id,
                        event_id = %event.event_id,
                        error = %reason,
                        correlation_id = %correlation_id,
                        "permanent delivery failure, dropping event"
                    );
                }
            }
        }

        Ok(())
    }

    fn sender_for<'a>(&'a self, event_sender: &'a str) -> &'a str {
        if event_sender.is_empty() {
            &self.default_sender
        } else {
            event_sender
        }
    }
}

/// Renders one event for immediate delivery, preferring its own subject
/// line over the synthesized summary subject.
fn render_single(event: &Event, method: AggregationMethod) -> RenderedMessage {
    let mut rendered = render(&event.user_id, std::slice::from_ref(event), method);
    if !event.subject.is_empty() {
        rendered.subject = event.subject.clone();
    }
    rendered
}

/// Synthesized subscription for gateway-mode direct email.
fn gateway_subscription(address: &str) -> Subscription {
    Subscription {
        subscription_id: format!("gateway-{address}"),
        user_id: format!("gateway-{address}"),
        delivery_method: DeliveryMethod::Email,
        aggregation_frequency: AggregationFrequency::Immediate,
        aggregation_method: AggregationMethod::Plain,
        delivery_error_strategy: DeliveryErrorStrategy::Ignore,
        delivery_time: "09:00".to_string(),
        timezone: "UTC".to_string(),
        email_address: Some(address.to_string()),
        slack_webhook_url: None,
        aggregated_message_subject: None,
        enabled: true,
    }
}
