//! Admin handlers over the whole undelivered collection.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use courier_core::Event;
use courier_store::{EventFilter, UndeliveredStats};

use super::parse_event_type;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn default_limit() -> Option<usize> {
    Some(100)
}

/// Query parameters for the admin listing.
#[derive(Debug, Deserialize)]
pub struct UndeliveredQuery {
    /// Maximum number of events to return.
    #[serde(default = "default_limit")]
    pub limit: Option<usize>,
    /// Filter by event type.
    #[serde(default)]
    pub event_type: Option<String>,
}

/// Body of the bulk deletion request.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteUndeliveredRequest {
    /// Delete exactly these events.
    #[serde(default)]
    pub event_ids: Option<Vec<String>>,
    /// Delete one user's events.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Bound for user deletion; requires `user_id`.
    #[serde(default)]
    pub before_timestamp: Option<DateTime<Utc>>,
}

/// Bulk deletion response.
#[derive(Debug, Serialize)]
pub struct DeleteUndeliveredResponse {
    /// Events removed
    pub events_deleted: u64,
    /// Users whose backlog shrank
    pub users_affected: Vec<String>,
}

/// Lists undelivered events across all users.
///
/// GET /undelivered
pub async fn list_undelivered(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UndeliveredQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let mut filter = EventFilter::all();
    if let Some(ref value) = query.event_type {
        filter.event_type = Some(parse_event_type(value)?);
    }
    filter.limit = query.limit;

    let events = state.store.get_undelivered_events(&filter).await?;
    Ok(Json(events))
}

/// Returns aggregate counts over the undelivered collection.
///
/// GET /undelivered/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<UndeliveredStats>> {
    Ok(Json(state.store.stats().await?))
}

/// Deletes undelivered events by id list or by user.
///
/// DELETE /undelivered
pub async fn delete_undelivered(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteUndeliveredRequest>,
) -> ApiResult<Json<DeleteUndeliveredResponse>> {
    if let Some(event_ids) = &request.event_ids {
        let mut users_affected = BTreeSet::new();
        for event_id in event_ids {
            if let Some(event) = state.store.get_event(event_id).await? {
                users_affected.insert(event.user_id);
            }
        }
        let events_deleted = state.store.delete_events(event_ids).await?;
        return Ok(Json(DeleteUndeliveredResponse {
            events_deleted,
            users_affected: users_affected.into_iter().collect(),
        }));
    }

    if let Some(user_id) = &request.user_id {
        let before = request.before_timestamp.unwrap_or_else(Utc::now);
        let events_deleted = state.store.clear_events(user_id, before).await?;
        return Ok(Json(DeleteUndeliveredResponse {
            events_deleted,
            users_affected: if events_deleted > 0 {
                vec![user_id.clone()]
            } else {
                Vec::new()
            },
        }));
    }

    if request.before_timestamp.is_some() {
        warn!("global deletion by timestamp rejected");
        return Err(ApiError::BadRequest(
            "global deletion by timestamp is not supported; specify user_id or event_ids"
                .to_string(),
        ));
    }

    Err(ApiError::BadRequest(
        "must specify event_ids or user_id".to_string(),
    ))
}
