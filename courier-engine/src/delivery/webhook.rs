//! HTTP webhook delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use courier_core::Subscription;

use super::{DeliveryOutcome, DeliveryProvider};
use crate::aggregate::RenderedMessage;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook request body.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    message: &'a str,
    sender: &'a str,
}

/// Delivery via HTTP POST to a Slack-compatible webhook URL.
///
/// One shared client provides connection pooling; every request carries a
/// 30-second timeout.
pub struct WebhookProvider {
    client: reqwest::Client,
}

impl Default for WebhookProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookProvider {
    /// Creates the provider with its shared HTTP client.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl DeliveryProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(
        &self,
        subscription: &Subscription,
        message: &RenderedMessage,
        sender: &str,
    ) -> DeliveryOutcome {
        let Some(url) = subscription.slack_webhook_url.as_deref() else {
            return DeliveryOutcome::Permanent(
                "webhook URL not configured for subscription".to_string(),
            );
        };

        let payload = WebhookPayload {
            subject: &message.subject,
            message: &message.body,
            sender,
        };

        debug!(subject = %message.subject, "posting webhook");

        match self.client.post(url).json(&payload).send().await {
            Ok(response) => outcome_for_status(response.status()),
            // Connection errors and timeouts are retryable.
            Err(e) => DeliveryOutcome::Transient(e.to_string()),
        }
    }
}

/// Maps a webhook response status to an outcome: 2xx delivered; 408, 429 and
/// 5xx transient; other 4xx permanent.
fn outcome_for_status(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        DeliveryOutcome::Delivered
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        DeliveryOutcome::Transient(format!("webhook returned HTTP {status}"))
    } else if status.is_client_error() {
        DeliveryOutcome::Permanent(format!("webhook returned HTTP {status}"))
    } else {
        DeliveryOutcome::Transient(format!("webhook returned HTTP {status}"))
    }
}
