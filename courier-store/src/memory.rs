//! In-memory event store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use courier_core::{Event, Subscription};

use crate::store::{order_and_limit, stats_from_events};
use crate::{EventFilter, EventStore, StoreError, UndeliveredStats};

#[derive(Default)]
struct Inner {
    events: HashMap<String, Event>,
    subscriptions: HashMap<String, Subscription>,
}

/// Volatile [`EventStore`] holding both collections in process memory.
///
/// Shares the contract of the file backend, without durability. Used by the
/// test suite and by `storage = memory` deployments.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: RwLock<Inner>,
}

impl MemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.inner.read().events.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn store_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.events.contains_key(&event.event_id) {
            debug!(event_id = %event.event_id, "event already stored, skipping");
            return Ok(());
        }
        inner.events.insert(event.event_id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.inner.read().events.get(event_id).cloned())
    }

    async fn get_undelivered_events(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<Event>, StoreError> {
        let matched: Vec<Event> = self
            .inner
            .read()
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        Ok(order_and_limit(matched, filter.limit))
    }

    async fn clear_events(&self, user_id: &str, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let doomed: Vec<String> = inner
            .events
            .values()
            .filter(|e| e.user_id == user_id && e.timestamp <= before)
            .map(|e| e.event_id.clone())
            .collect();
        for event_id in &doomed {
            inner.events.remove(event_id);
        }
        Ok(doomed.len() as u64)
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().events.remove(event_id).is_some())
    }

    async fn delete_events(&self, event_ids: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let mut deleted = 0;
        for event_id in event_ids {
            if inner.events.remove(event_id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn users_with_undelivered(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read();
        let mut users: Vec<String> = inner.events.values().map(|e| e.user_id.clone()).collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }

    async fn list_subscriptions(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .inner
            .read()
            .subscriptions
            .values()
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .cloned()
            .collect())
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .inner
            .read()
            .subscriptions
            .get(subscription_id)
            .cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.inner
            .write()
            .subscriptions
            .insert(subscription.subscription_id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .write()
            .subscriptions
            .remove(subscription_id)
            .is_some())
    }

    async fn subscribed_users(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read();
        let mut users: Vec<String> = inner
            .subscriptions
            .values()
            .map(|s| s.user_id.clone())
            .collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }

    async fn stats(&self) -> Result<UndeliveredStats, StoreError> {
        Ok(stats_from_events(self.inner.read().events.values()))
    }
}
