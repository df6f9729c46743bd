//! API route definitions.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{events, flush, health, messages, subscriptions, undelivered, users};
use crate::state::AppState;

/// Creates the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/users", get(users::list_users))
        .route(
            "/users/{user_id}/messages",
            get(messages::list_user_messages).delete(messages::delete_user_messages),
        )
        .route(
            "/users/{user_id}/messages/{message_id}",
            get(messages::get_user_message).delete(messages::delete_user_message),
        )
        .route(
            "/users/{user_id}/subscriptions",
            get(subscriptions::list_subscriptions).post(subscriptions::create_subscription),
        )
        .route(
            "/users/{user_id}/subscriptions/{subscription_id}",
            get(subscriptions::get_subscription)
                .put(subscriptions::update_subscription)
                .delete(subscriptions::delete_subscription),
        )
        .route(
            "/undelivered",
            get(undelivered::list_undelivered).delete(undelivered::delete_undelivered),
        )
        .route("/undelivered/stats", get(undelivered::stats))
        .route("/flush", post(flush::flush))
        .route("/events", post(events::publish_event))
        .with_state(state)
}
