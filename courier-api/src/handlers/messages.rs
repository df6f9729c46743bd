//! Per-user undelivered message handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use courier_core::Event;
use courier_store::EventFilter;

use super::parse_event_type;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query parameters for message listing.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    /// Filter by event type.
    #[serde(default)]
    pub event_type: Option<String>,
    /// Maximum number of messages to return.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Deletion count response.
#[derive(Debug, Serialize)]
pub struct DeleteCount {
    /// Events removed
    pub events_deleted: u64,
}

/// Query parameters for bulk message deletion.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteMessagesQuery {
    /// Only delete messages with `timestamp <= before_timestamp`.
    #[serde(default)]
    pub before_timestamp: Option<DateTime<Utc>>,
}

/// Lists one user's undelivered messages.
///
/// GET /users/{user_id}/messages
pub async fn list_user_messages(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let mut filter = EventFilter::for_user(&user_id);
    if let Some(ref value) = query.event_type {
        filter.event_type = Some(parse_event_type(value)?);
    }
    filter.limit = query.limit;

    let events = state.store.get_undelivered_events(&filter).await?;
    Ok(Json(events))
}

/// Fetches one undelivered message.
///
/// GET /users/{user_id}/messages/{message_id}
pub async fn get_user_message(
    State(state): State<Arc<AppState>>,
    Path((user_id, message_id)): Path<(String, String)>,
) -> ApiResult<Json<Event>> {
    match state.store.get_event(&message_id).await? {
        Some(event) if event.user_id == user_id => Ok(Json(event)),
        _ => Err(ApiError::NotFound(format!(
            "message {message_id} not found for user {user_id}"
        ))),
    }
}

/// Deletes one undelivered message.
///
/// DELETE /users/{user_id}/messages/{message_id}
pub async fn delete_user_message(
    State(state): State<Arc<AppState>>,
    Path((user_id, message_id)): Path<(String, String)>,
) -> ApiResult<Json<DeleteCount>> {
    let owned = state
        .store
        .get_event(&message_id)
        .await?
        .is_some_and(|event| event.user_id == user_id);
    if !owned {
        return Err(ApiError::NotFound(format!(
            "message {message_id} not found for user {user_id}"
        )));
    }

    state.store.delete_event(&message_id).await?;
    Ok(Json(DeleteCount { events_deleted: 1 }))
}

/// Deletes one user's messages, optionally bounded by timestamp.
///
/// DELETE /users/{user_id}/messages
pub async fn delete_user_messages(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<DeleteMessagesQuery>,
) -> ApiResult<Json<DeleteCount>> {
    let before = query.before_timestamp.unwrap_or_else(Utc::now);
    let events_deleted = state.store.clear_events(&user_id, before).await?;
    Ok(Json(DeleteCount { events_deleted }))
}
