//! Subscription CRUD handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use courier_core::{
    AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod, Subscription,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn default_aggregation_method() -> AggregationMethod {
    AggregationMethod::Plain
}

fn default_error_strategy() -> DeliveryErrorStrategy {
    DeliveryErrorStrategy::Retry
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

/// Body of the subscription creation request.
#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Owning user; must match the path.
    pub user_id: String,
    /// Delivery channel.
    pub delivery_method: DeliveryMethod,
    /// Delivery cadence.
    pub aggregation_frequency: AggregationFrequency,
    /// Rendering format.
    #[serde(default = "default_aggregation_method")]
    pub aggregation_method: AggregationMethod,
    /// Transient-failure policy.
    #[serde(default = "default_error_strategy")]
    pub delivery_error_strategy: DeliveryErrorStrategy,
    /// Wall-clock delivery time.
    #[serde(default = "default_delivery_time")]
    pub delivery_time: String,
    /// IANA timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Recipient address for EMAIL.
    #[serde(default)]
    pub email_address: Option<String>,
    /// Webhook URL for SLACK.
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// Subject line for aggregated deliveries.
    #[serde(default)]
    pub aggregated_message_subject: Option<String>,
    /// Whether the subscription is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Body of the partial update request; absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateSubscriptionRequest {
    /// New delivery channel.
    #[serde(default)]
    pub delivery_method: Option<DeliveryMethod>,
    /// New cadence.
    #[serde(default)]
    pub aggregation_frequency: Option<AggregationFrequency>,
    /// New rendering format.
    #[serde(default)]
    pub aggregation_method: Option<AggregationMethod>,
    /// New failure policy.
    #[serde(default)]
    pub delivery_error_strategy: Option<DeliveryErrorStrategy>,
    /// New delivery time.
    #[serde(default)]
    pub delivery_time: Option<String>,
    /// New timezone.
    #[serde(default)]
    pub timezone: Option<String>,
    /// New email address.
    #[serde(default)]
    pub email_address: Option<String>,
    /// New webhook URL.
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    /// New aggregated subject.
    #[serde(default)]
    pub aggregated_message_subject: Option<String>,
    /// Enable or disable.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Deletion response.
#[derive(Debug, Serialize)]
pub struct DeleteSubscriptionResponse {
    /// Whether the subscription existed.
    pub deleted: bool,
}

/// Lists a user's subscriptions, disabled ones included.
///
/// GET /users/{user_id}/subscriptions
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<Subscription>>> {
    Ok(Json(state.store.list_subscriptions(Some(&user_id)).await?))
}

/// Creates a subscription.
///
/// POST /users/{user_id}/subscriptions
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    if user_id != request.user_id {
        return Err(ApiError::BadRequest(
            "user_id in path must match user_id in body".to_string(),
        ));
    }

    let subscription = Subscription {
        subscription_id: Subscription::generate_id(&user_id, request.delivery_method, Utc::now()),
        user_id: request.user_id,
        delivery_method: request.delivery_method,
        aggregation_frequency: request.aggregation_frequency,
        aggregation_method: request.aggregation_method,
        delivery_error_strategy: request.delivery_error_strategy,
        delivery_time: request.delivery_time,
        timezone: request.timezone,
        email_address: request.email_address,
        slack_webhook_url: request.slack_webhook_url,
        aggregated_message_subject: request.aggregated_message_subject,
        enabled: request.enabled,
    };
    subscription.validate()?;

    state.store.upsert_subscription(&subscription).await?;
    info!(
        user_id = %subscription.user_id,
        subscription_id = %subscription.subscription_id,
        delivery_method = %subscription.delivery_method,
        "subscription created"
    );
    Ok(Json(subscription))
}

/// Fetches one subscription.
///
/// GET /users/{user_id}/subscriptions/{subscription_id}
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path((user_id, subscription_id)): Path<(String, String)>,
) -> ApiResult<Json<Subscription>> {
    match state.store.get_subscription(&subscription_id).await? {
        Some(subscription) if subscription.user_id == user_id => Ok(Json(subscription)),
        _ => Err(ApiError::NotFound(format!(
            "subscription {subscription_id} not found for user {user_id}"
        ))),
    }
}

/// Applies a partial update to one subscription.
///
/// PUT /users/{user_id}/subscriptions/{subscription_id}
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    Path((user_id, subscription_id)): Path<(String, String)>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> ApiResult<Json<Subscription>> {
    let mut subscription = match state.store.get_subscription(&subscription_id).await? {
        Some(subscription) if subscription.user_id == user_id => subscription,
        _ => {
            return Err(ApiError::NotFound(format!(
                "subscription {subscription_id} not found for user {user_id}"
            )))
        }
    };

    if let Some(value) = request.delivery_method {
        subscription.delivery_method = value;
    }
    if let Some(value) = request.aggregation_frequency {
        subscription.aggregation_frequency = value;
    }
    if let Some(value) = request.aggregation_method {
        subscription.aggregation_method = value;
    }
    if let Some(value) = request.delivery_error_strategy {
        subscription.delivery_error_strategy = value;
    }
    if let Some(value) = request.delivery_time {
        subscription.delivery_time = value;
    }
    if let Some(value) = request.timezone {
        subscription.timezone = value;
    }
    if let Some(value) = request.email_address {
        subscription.email_address = Some(value);
    }
    if let Some(value) = request.slack_webhook_url {
        subscription.slack_webhook_url = Some(value);
    }
    if let Some(value) = request.aggregated_message_subject {
        subscription.aggregated_message_subject = Some(value);
    }
    if let Some(value) = request.enabled {
        subscription.enabled = value;
    }

    subscription.validate()?;
    state.store.upsert_subscription(&subscription).await?;
    info!(
        user_id = %subscription.user_id,
        subscription_id = %subscription.subscription_id,
        "subscription updated"
    );
    Ok(Json(subscription))
}

/// Deletes one subscription.
///
/// DELETE /users/{user_id}/subscriptions/{subscription_id}
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    Path((user_id, subscription_id)): Path<(String, String)>,
) -> ApiResult<Json<DeleteSubscriptionResponse>> {
    let owned = state
        .store
        .get_subscription(&subscription_id)
        .await?
        .is_some_and(|subscription| subscription.user_id == user_id);
    if !owned {
        return Err(ApiError::NotFound(format!(
            "subscription {subscription_id} not found for user {user_id}"
        )));
    }

    let deleted = state.store.delete_subscription(&subscription_id).await?;
    info!(user_id = %user_id, subscription_id = %subscription_id, "subscription deleted");
    Ok(Json(DeleteSubscriptionResponse { deleted }))
}
