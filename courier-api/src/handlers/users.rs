//! Per-user overview handlers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::state::AppState;

/// Per-user subscription and backlog counts.
#[derive(Debug, Serialize)]
pub struct UserStats {
    /// User identifier
    pub user_id: String,
    /// Total subscriptions, enabled or not
    pub subscription_count: usize,
    /// Undelivered events for this user
    pub undelivered_count: u64,
    /// Enabled subscriptions
    pub enabled_subscriptions: usize,
}

/// Query parameters for user listing.
#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    /// Include users that have subscriptions but no undelivered events.
    #[serde(default)]
    pub include_empty: bool,
}

/// Lists users with their subscription and undelivered counts.
///
/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsersQuery>,
) -> ApiResult<Json<Vec<UserStats>>> {
    let stats = state.store.stats().await?;

    let mut users: BTreeSet<String> = stats.per_user.keys().cloned().collect();
    if query.include_empty {
        users.extend(state.store.subscribed_users().await?);
    }

    let mut result = Vec::with_capacity(users.len());
    for user_id in users {
        let undelivered_count = stats.per_user.get(&user_id).copied().unwrap_or(0);
        if undelivered_count == 0 && !query.include_empty {
            continue;
        }
        let subscriptions = state.store.list_subscriptions(Some(&user_id)).await?;
        let enabled_subscriptions = subscriptions.iter().filter(|s| s.enabled).count();
        result.push(UserStats {
            user_id,
            subscription_count: subscriptions.len(),
            undelivered_count,
            enabled_subscriptions,
        });
    }

    Ok(Json(result))
}
