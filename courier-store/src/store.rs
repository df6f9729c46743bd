//! Storage contract and shared query types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_core::{Event, EventType, Subscription};

/// Storage error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store could not complete an operation.
    #[error("storage unavailable during {operation}: {reason}")]
    Unavailable {
        /// Operation that failed (store_event, clear_events, ...).
        operation: String,
        /// Underlying cause.
        reason: String,
    },

    /// A record could not be encoded or decoded.
    #[error("serialization error for '{key}': {reason}")]
    Serialization {
        /// Record key.
        key: String,
        /// Underlying cause.
        reason: String,
    },
}

impl StoreError {
    /// Creates an `Unavailable` error for the given operation.
    #[must_use]
    pub fn unavailable(operation: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a `Serialization` error for the given record key.
    #[must_use]
    pub fn serialization(key: &str, reason: impl ToString) -> Self {
        Self::Serialization {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Query filter for undelivered events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Restrict to one user.
    pub user_id: Option<String>,
    /// Restrict to one event type.
    pub event_type: Option<EventType>,
    /// Maximum number of events to return; `None` means all.
    pub limit: Option<usize>,
}

impl EventFilter {
    /// Filter matching every stored event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching one user's events.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Restricts the filter to one event type.
    #[must_use]
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Caps the number of returned events.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event passes the user/type predicates (the limit is
    /// applied after ordering).
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref user_id) = self.user_id {
            if &event.user_id != user_id {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over the undelivered-events collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndeliveredStats {
    /// Number of users with at least one undelivered event.
    #[serde(rename = "total_users_with_undelivered")]
    pub users_with_undelivered: u64,
    /// Total undelivered events.
    #[serde(rename = "total_undelivered_events")]
    pub total_undelivered: u64,
    /// Undelivered counts per user.
    #[serde(rename = "users_with_counts")]
    pub per_user: HashMap<String, u64>,
    /// Undelivered counts per event type.
    #[serde(rename = "events_by_type")]
    pub per_type: HashMap<EventType, u64>,
}

/// Persistence contract for events and subscriptions.
///
/// Implementations own the two logical collections (`events` keyed by
/// `event_id`, `subscriptions` keyed by `subscription_id`) and must keep
/// `store_event` / `clear_events` atomic with respect to each other: an
/// event whose timestamp is strictly greater than a clear's bound is never
/// removed by that clear.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persists one event, keyed by `event_id`.
    ///
    /// Storing an id that already exists is a no-op success, which makes
    /// transport redelivery harmless.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on backing-store I/O failure.
    async fn store_event(&self, event: &Event) -> Result<(), StoreError>;

    /// Looks up one event by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Returns undelivered events matching the filter, ordered ascending by
    /// `(timestamp, event_id)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn get_undelivered_events(&self, filter: &EventFilter)
        -> Result<Vec<Event>, StoreError>;

    /// Removes every event of `user_id` with `timestamp <= before`,
    /// returning the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn clear_events(&self, user_id: &str, before: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Removes one event by id, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn delete_event(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Removes a batch of events by id, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn delete_events(&self, event_ids: &[String]) -> Result<u64, StoreError>;

    /// Returns the distinct users with at least one undelivered event.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn users_with_undelivered(&self) -> Result<Vec<String>, StoreError>;

    /// Returns subscriptions, optionally restricted to one user. Ordering
    /// is unspecified; callers must treat the result as a set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn list_subscriptions(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Looks up one subscription by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Creates or replaces a subscription, keyed by `subscription_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Removes one subscription, returning whether it existed. Deleting a
    /// missing id is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StoreError>;

    /// Returns the distinct users that hold at least one subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn subscribed_users(&self) -> Result<Vec<String>, StoreError>;

    /// Returns aggregate counts over the undelivered collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn stats(&self) -> Result<UndeliveredStats, StoreError>;

    /// Returns one user's enabled subscriptions.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn enabled_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>, StoreError> {
        let subscriptions = self.list_subscriptions(Some(user_id)).await?;
        Ok(subscriptions.into_iter().filter(|s| s.enabled).collect())
    }
}

/// Orders events ascending by `(timestamp, event_id)` and applies the limit.
pub(crate) fn order_and_limit(mut events: Vec<Event>, limit: Option<usize>) -> Vec<Event> {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    if let Some(limit) = limit {
        events.truncate(limit);
    }
    events
}

/// Derives stats by scanning an event iterator.
pub(crate) fn stats_from_events<'a>(events: impl Iterator<Item = &'a Event>) -> UndeliveredStats {
    let mut stats = UndeliveredStats::default();
    for event in events {
        stats.total_undelivered += 1;
        *stats.per_user.entry(event.user_id.clone()).or_default() += 1;
        *stats.per_type.entry(event.event_type).or_default() += 1;
    }
    stats.users_with_undelivered = stats.per_user.len() as u64;
    stats
}
