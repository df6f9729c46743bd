//! File-backed event store.
//!
//! Durable [`EventStore`] keeping one JSON document per record:
//!
//! ```text
//! <base_dir>/events/<event_id>.json
//! <base_dir>/subscriptions/<subscription_id>.json
//! ```
//!
//! The full record set is loaded into an in-memory index at open and kept in
//! sync under a single `RwLock`, which also provides the atomicity the
//! contract requires between `store_event` and `clear_events`. Document
//! writes go to a temp file first and are renamed into place, so a crashed
//! write never leaves a truncated document behind.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use courier_core::{Event, Subscription};

use crate::store::{order_and_limit, stats_from_events};
use crate::{EventFilter, EventStore, StoreError, UndeliveredStats};

const EVENTS_DIR: &str = "events";
const SUBSCRIPTIONS_DIR: &str = "subscriptions";

/// Per-user ordered key into the events index: `(user_id, timestamp,
/// event_id)`. `BTreeSet` range scans over this key emulate the composite
/// `(user_id, timestamp)` index the query contract calls for.
type UserTimeKey = (String, DateTime<Utc>, String);

#[derive(Default)]
struct Index {
    events: HashMap<String, Event>,
    by_user: BTreeSet<UserTimeKey>,
    subscriptions: HashMap<String, Subscription>,
}

impl Index {
    fn insert_event(&mut self, event: Event) {
        self.by_user.insert((
            event.user_id.clone(),
            event.timestamp,
            event.event_id.clone(),
        ));
        self.events.insert(event.event_id.clone(), event);
    }

    fn remove_event(&mut self, event_id: &str) -> Option<Event> {
        let event = self.events.remove(event_id)?;
        self.by_user.remove(&(
            event.user_id.clone(),
            event.timestamp,
            event.event_id.clone(),
        ));
        Some(event)
    }
}

/// Durable [`EventStore`] over a directory of JSON documents.
pub struct FileEventStore {
    events_dir: PathBuf,
    subscriptions_dir: PathBuf,
    index: RwLock<Index>,
}

impl FileEventStore {
    /// Opens a store rooted at `base_dir`, creating the collection
    /// directories if needed and loading all existing documents.
    ///
    /// Documents that fail to parse are skipped with a warning rather than
    /// failing the open; the store never deletes what it cannot read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the directories cannot be
    /// created or read.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref();
        let events_dir = base_dir.join(EVENTS_DIR);
        let subscriptions_dir = base_dir.join(SUBSCRIPTIONS_DIR);
        for dir in [&events_dir, &subscriptions_dir] {
            fs::create_dir_all(dir).map_err(|e| StoreError::unavailable("open", e))?;
        }

        let mut index = Index::default();
        for event in load_collection::<Event>(&events_dir)? {
            index.insert_event(event);
        }
        for subscription in load_collection::<Subscription>(&subscriptions_dir)? {
            index
                .subscriptions
                .insert(subscription.subscription_id.clone(), subscription);
        }

        info!(
            base_dir = %base_dir.display(),
            events = index.events.len(),
            subscriptions = index.subscriptions.len(),
            "file store opened"
        );

        Ok(Self {
            events_dir,
            subscriptions_dir,
            index: RwLock::new(index),
        })
    }

    fn event_path(&self, event_id: &str) -> PathBuf {
        self.events_dir.join(document_name(event_id))
    }

    fn subscription_path(&self, subscription_id: &str) -> PathBuf {
        self.subscriptions_dir.join(document_name(subscription_id))
    }
}

/// Maps a record id to its document file name. Ids are caller-supplied
/// strings, so separators are percent-escaped to keep one file per record.
fn document_name(id: &str) -> String {
    let mut name = String::with_capacity(id.len() + 5);
    for ch in id.chars() {
        match ch {
            '/' | '\\' | '%' => {
                name.push('%');
                name.push_str(&format!("{:02X}", ch as u32));
            }
            _ => name.push(ch),
        }
    }
    name.push_str(".json");
    name
}

fn load_collection<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| StoreError::unavailable("open", e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::unavailable("open", e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| StoreError::unavailable("open", e))?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable document");
            }
        }
    }
    Ok(records)
}

fn write_document<T: Serialize>(path: &Path, operation: &str, record: &T) -> Result<(), StoreError> {
    let key = path.display().to_string();
    let bytes = serde_json::to_vec_pretty(record)
        .map_err(|e| StoreError::serialization(&key, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| StoreError::unavailable(operation, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::unavailable(operation, e))?;
    Ok(())
}

fn remove_document(path: &Path, operation: &str) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::unavailable(operation, e)),
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn store_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut index = self.index.write();
        if index.events.contains_key(&event.event_id) {
            debug!(event_id = %event.event_id, "event already stored, skipping");
            return Ok(());
        }
        write_document(&self.event_path(&event.event_id), "store_event", event)?;
        index.insert_event(event.clone());
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.index.read().events.get(event_id).cloned())
    }

    async fn get_undelivered_events(
        &self,
        filter: &EventFilter,
    ) -> Result<Vec<Event>, StoreError> {
        let index = self.index.read();
        let matched: Vec<Event> = match filter.user_id {
            // Range scan over the (user, timestamp, id) key.
            Some(ref user_id) => index
                .by_user
                .range((user_id.clone(), DateTime::<Utc>::MIN_UTC, String::new())..)
                .take_while(|(user, _, _)| user == user_id)
                .filter_map(|(_, _, event_id)| index.events.get(event_id))
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
            None => index
                .events
                .values()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect(),
        };
        Ok(order_and_limit(matched, filter.limit))
    }

    async fn clear_events(&self, user_id: &str, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut index = self.index.write();
        let doomed: Vec<String> = index
            .by_user
            .range((user_id.to_string(), DateTime::<Utc>::MIN_UTC, String::new())..)
            .take_while(|(user, timestamp, _)| user == user_id && *timestamp <= before)
            .map(|(_, _, event_id)| event_id.clone())
            .collect();

        for event_id in &doomed {
            remove_document(&self.event_path(event_id), "clear_events")?;
            index.remove_event(event_id);
        }
        debug!(user_id = %user_id, cleared = doomed.len(), before = %before, "events cleared");
        Ok(doomed.len() as u64)
    }

    async fn delete_event(&self, event_id: &str) -> Result<bool, StoreError> {
        let mut index = self.index.write();
        if index.events.contains_key(event_id) {
            remove_document(&self.event_path(event_id), "delete_event")?;
            index.remove_event(event_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete_events(&self, event_ids: &[String]) -> Result<u64, StoreError> {
        let mut index = self.index.write();
        let mut deleted = 0;
        for event_id in event_ids {
            if index.events.contains_key(event_id) {
                remove_document(&self.event_path(event_id), "delete_events")?;
                index.remove_event(event_id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn users_with_undelivered(&self) -> Result<Vec<String>, StoreError> {
        let index = self.index.read();
        let mut users: Vec<String> = index
            .by_user
            .iter()
            .map(|(user, _, _)| user.clone())
            .collect();
        users.dedup();
        Ok(users)
    }

    async fn list_subscriptions(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<Subscription>, StoreError> {
        Ok(self
            .index
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
            .index
            .read()
            .subscriptions
            .get(subscription_id)
            .cloned())
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut index = self.index.write();
        write_document(
            &self.subscription_path(&subscription.subscription_id),
            "upsert_subscription",
            subscription,
        )?;
        index
            .subscriptions
            .insert(subscription.subscription_id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> Result<bool, StoreError> {
        let mut index = self.index.write();
        if index.subscriptions.contains_key(subscription_id) {
            remove_document(
                &self.subscription_path(subscription_id),
                "delete_subscription",
            )?;
            index.subscriptions.remove(subscription_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn subscribed_users(&self) -> Result<Vec<String>, StoreError> {
        let index = self.index.read();
        let mut users: Vec<String> = index
            .subscriptions
            .values()
            .map(|s| s.user_id.clone())
            .collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }

    async fn stats(&self) -> Result<UndeliveredStats, StoreError> {
        Ok(stats_from_events(self.index.read().events.values()))
    }
}
