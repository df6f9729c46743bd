//! Inbound message envelope.
//!
//! Explicit tagged parsing of the pub/sub JSON payload. Unknown enum values
//! and malformed targets are rejected here, at the boundary, so the rest of
//! the pipeline only sees well-formed envelopes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use courier_core::{Event, EventType};

/// Envelope rejection reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The payload is not valid JSON or misses required fields.
    #[error("malformed envelope: {reason}")]
    Malformed {
        /// Parser diagnostic.
        reason: String,
    },

    /// None of `user_id`, `user_ids`, `email_to` is present.
    #[error("envelope has no delivery target")]
    MissingTarget,

    /// More than one of `user_id`, `user_ids`, `email_to` is present.
    #[error("envelope has more than one delivery target")]
    ConflictingTargets,

    /// `user_ids` is present but empty.
    #[error("user_ids is empty")]
    EmptyUserList,
}

/// Who an envelope addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeTarget {
    /// Subscription-routed delivery to these users.
    Users(Vec<String>),
    /// Gateway mode: one direct email, bypassing subscription lookup.
    EmailGateway(String),
}

fn default_event_type() -> EventType {
    EventType::Notification
}

/// Parsed pub/sub message payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Publisher-assigned event id.
    pub event_id: String,
    /// Single-recipient target.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Fan-out target list.
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
    /// Event classification; defaults to NOTIFICATION.
    #[serde(default = "default_event_type")]
    pub event_type: EventType,
    /// Message body.
    #[serde(default)]
    pub message: String,
    /// Publisher identity.
    #[serde(default)]
    pub sender: String,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Publisher-assigned instant (RFC 3339).
    pub timestamp: DateTime<Utc>,
    /// Opaque annotations.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Gateway-mode recipient address.
    #[serde(default)]
    pub email_to: Option<String>,
}

impl Envelope {
    /// Parses and validates one raw payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] for malformed JSON, unknown enum values,
    /// or an invalid target combination.
    pub fn parse(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(payload).map_err(|e| EnvelopeError::Malformed {
                reason: e.to_string(),
            })?;
        envelope.target()?;
        Ok(envelope)
    }

    /// Resolves the delivery target, enforcing that exactly one of
    /// `user_id`, `user_ids`, `email_to` is present.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] when the target fields conflict or are
    /// absent.
    pub fn target(&self) -> Result<EnvelopeTarget, EnvelopeError> {
        let set = [
            self.user_id.is_some(),
            self.user_ids.is_some(),
            self.email_to.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        match set {
            0 => return Err(EnvelopeError::MissingTarget),
            1 => {}
            _ => return Err(EnvelopeError::ConflictingTargets),
        }

        if let Some(address) = &self.email_to {
            return Ok(EnvelopeTarget::EmailGateway(address.clone()));
        }
        if let Some(user_id) = &self.user_id {
            return Ok(EnvelopeTarget::Users(vec![user_id.clone()]));
        }
        let user_ids = self.user_ids.clone().unwrap_or_default();
        if user_ids.is_empty() {
            return Err(EnvelopeError::EmptyUserList);
        }
        Ok(EnvelopeTarget::Users(user_ids))
    }

    /// Materializes the event for one target user.
    ///
    /// The stored id is derived as `<event_id>-<user_id>` so fan-out events
    /// stay unique per user while redeliveries of the same envelope map to
    /// the same record.
    #[must_use]
    pub fn event_for(&self, user_id: &str) -> Event {
        Event {
            event_id: format!("{}-{}", self.event_id, user_id),
            user_id: user_id.to_string(),
            event_type: self.event_type,
            message: self.message.clone(),
            sender: self.sender.clone(),
            subject: self.subject.clone(),
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }
}
