//! Delivery providers.
//!
//! Providers are oblivious senders: they know nothing about events or the
//! store and never retry internally. Retry policy belongs to the callers
//! (the ingestion processor and the flush engine) via each subscription's
//! `delivery_error_strategy`.

mod email;
mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use courier_core::{DeliveryMethod, SmtpConfig, Subscription};

use crate::aggregate::RenderedMessage;

pub use email::SmtpProvider;
pub use webhook::WebhookProvider;

/// Outcome of one delivery attempt.
///
/// Transient failures may succeed on a later attempt (the flush loop or a
/// transport redelivery); permanent failures will not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The provider accepted the message.
    Delivered,
    /// Retryable failure (network, 4xx SMTP, 5xx/timeout webhook).
    Transient(String),
    /// Non-retryable failure (5xx SMTP, non-retryable 4xx webhook).
    Permanent(String),
}

impl DeliveryOutcome {
    /// Whether the message was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Whether a later attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Human-readable description of the failure, if any.
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::Transient(reason) | Self::Permanent(reason) => Some(reason),
        }
    }
}

/// Provider construction failure.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The SMTP transport could not be configured.
    #[error("smtp transport setup failed: {reason}")]
    SmtpSetup {
        /// Underlying cause.
        reason: String,
    },
}

/// Uniform send contract implemented by every delivery channel.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Returns the provider name, used in logs.
    fn name(&self) -> &'static str;

    /// Attempts one delivery of `message` to the subscription's target.
    async fn send(
        &self,
        subscription: &Subscription,
        message: &RenderedMessage,
        sender: &str,
    ) -> DeliveryOutcome;
}

/// Routes sends to the provider matching a subscription's delivery method.
pub struct DeliveryService {
    email: Arc<dyn DeliveryProvider>,
    webhook: Arc<dyn DeliveryProvider>,
}

impl DeliveryService {
    /// Creates the production service with SMTP and webhook providers.
    ///
    /// # Errors
    ///
    /// Returns an error when the SMTP transport cannot be configured.
    pub fn new(smtp: &SmtpConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            email: Arc::new(SmtpProvider::new(smtp)?),
            webhook: Arc::new(WebhookProvider::new()),
        })
    }

    /// Creates a service over arbitrary providers.
    #[must_use]
    pub fn with_providers(
        email: Arc<dyn DeliveryProvider>,
        webhook: Arc<dyn DeliveryProvider>,
    ) -> Self {
        Self { email, webhook }
    }

    /// Delivers `message` through the channel the subscription selects and
    /// logs the outcome.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        message: &RenderedMessage,
        sender: &str,
        correlation_id: &str,
    ) -> DeliveryOutcome {
        let provider = match subscription.delivery_method {
            DeliveryMethod::Email => &self.email,
            DeliveryMethod::Slack => &self.webhook,
        };

        let outcome = provider.send(subscription, message, sender).await;
        match &outcome {
            DeliveryOutcome::Delivered => {
                info!(
                    provider = provider.name(),
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.subscription_id,
                    correlation_id = %correlation_id,
                    "message delivered"
                );
            }
            DeliveryOutcome::Transient(reason) | DeliveryOutcome::Permanent(reason) => {
                warn!(
                    provider = provider.name(),
                    user_id = %subscription.user_id,
                    subscription_id = %subscription.subscription_id,
                    correlation_id = %correlation_id,
                    transient = outcome.is_transient(),
                    error = %reason,
                    "delivery failed"
                );
            }
        }
        outcome
    }
}
