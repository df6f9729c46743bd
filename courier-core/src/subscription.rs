//! Subscription types and validation.
//!
//! A [`Subscription`] is one subscriber's delivery preference. A user may
//! hold any number of subscriptions; each is evaluated independently by the
//! ingestion processor and the flush engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery channel for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    /// SMTP email delivery.
    Email,
    /// Slack-compatible HTTP webhook delivery.
    Slack,
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => f.write_str("EMAIL"),
            Self::Slack => f.write_str("SLACK"),
        }
    }
}

/// How often accumulated events are delivered.
///
/// `Immediate` bypasses the store entirely; the deferred frequencies persist
/// events until a flush is invoked by an external clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationFrequency {
    /// Deliver at ingestion time, skipping the store.
    Immediate,
    /// Accumulate for hourly flushes.
    Hourly,
    /// Accumulate for daily flushes.
    Daily,
    /// Accumulate for weekly flushes.
    Weekly,
}

impl AggregationFrequency {
    /// Returns true for the frequencies that persist events for later flush.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        !matches!(self, Self::Immediate)
    }
}

impl fmt::Display for AggregationFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("IMMEDIATE"),
            Self::Hourly => f.write_str("HOURLY"),
            Self::Daily => f.write_str("DAILY"),
            Self::Weekly => f.write_str("WEEKLY"),
        }
    }
}

/// Rendering format for aggregated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationMethod {
    /// Plain-text summary.
    Plain,
    /// Self-contained HTML document.
    Html,
    /// multipart/mixed document with per-type parts.
    Mime,
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("PLAIN"),
            Self::Html => f.write_str("HTML"),
            Self::Mime => f.write_str("MIME"),
        }
    }
}

/// What to do with an event when delivery fails transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryErrorStrategy {
    /// Retain the event so a later flush retries it.
    Retry,
    /// Drop the event.
    Ignore,
}

impl fmt::Display for DeliveryErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("RETRY"),
            Self::Ignore => f.write_str("IGNORE"),
        }
    }
}

/// Subscription validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// EMAIL subscriptions require an email address.
    #[error("email_address is required for EMAIL delivery")]
    MissingEmailAddress,

    /// SLACK subscriptions require a webhook URL.
    #[error("slack_webhook_url is required for SLACK delivery")]
    MissingWebhookUrl,

    /// Only the target matching the delivery method may be set.
    #[error("exactly one of email_address and slack_webhook_url may be set")]
    ConflictingTargets,

    /// `delivery_time` must be a wall-clock `HH:MM` value.
    #[error("delivery_time '{value}' is not a valid HH:MM time")]
    InvalidDeliveryTime {
        /// The rejected value.
        value: String,
    },
}

fn default_delivery_time() -> String {
    "09:00".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_enabled() -> bool {
    true
}

/// A subscriber's delivery preference.
///
/// Exactly one of `email_address` / `slack_webhook_url` is populated,
/// selected by `delivery_method` ([`Subscription::validate`] enforces this).
/// A disabled subscription is treated as nonexistent for delivery purposes
/// but is still listed by the management API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub subscription_id: String,
    /// Owning user.
    pub user_id: String,
    /// Delivery channel.
    pub delivery_method: DeliveryMethod,
    /// Delivery cadence.
    pub aggregation_frequency: AggregationFrequency,
    /// Rendering format for aggregated deliveries.
    pub aggregation_method: AggregationMethod,
    /// Transient-failure policy.
    pub delivery_error_strategy: DeliveryErrorStrategy,
    /// Wall-clock delivery time; meaningful only for DAILY/WEEKLY.
    #[serde(default = "default_delivery_time")]
    pub delivery_time: String,
    /// IANA timezone identifier.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Recipient address for EMAIL delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    /// Webhook URL for SLACK delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack_webhook_url: Option<String>,
    /// Subject line for aggregated deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregated_message_subject: Option<String>,
    /// Whether the subscription participates in delivery.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Subscription {
    /// Generates a subscription id following the `<user>-<method>-<unix>`
    /// convention used by the management API.
    #[must_use]
    pub fn generate_id(user_id: &str, method: DeliveryMethod, now: DateTime<Utc>) -> String {
        let method = match method {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Slack => "slack",
        };
        format!("{}-{}-{}", user_id, method, now.timestamp())
    }

    /// Checks the subscription invariants.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the delivery target does not match
    /// the delivery method, when both targets are set, or when
    /// `delivery_time` is not a `HH:MM` value.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_email = self.email_address.as_deref().is_some_and(|a| !a.is_empty());
        let has_webhook = self
            .slack_webhook_url
            .as_deref()
            .is_some_and(|u| !u.is_empty());

        if has_email && has_webhook {
            return Err(ValidationError::ConflictingTargets);
        }
        match self.delivery_method {
            DeliveryMethod::Email if !has_email => return Err(ValidationError::MissingEmailAddress),
            DeliveryMethod::Slack if !has_webhook => return Err(ValidationError::MissingWebhookUrl),
            _ => {}
        }

        if !is_valid_delivery_time(&self.delivery_time) {
            return Err(ValidationError::InvalidDeliveryTime {
                value: self.delivery_time.clone(),
            });
        }

        Ok(())
    }
}

fn is_valid_delivery_time(value: &str) -> bool {
    let Some((hours, minutes)) = value.split_once(':') else {
        return false;
    };
    let ok = |part: &str, max: u32| {
        part.len() == 2 && part.parse::<u32>().map(|v| v < max).unwrap_or(false)
    };
    ok(hours, 24) && ok(minutes, 60)
}
