//! Flush trigger handler.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use tracing::info;

use courier_engine::{FlushReport, FlushRequest};

use crate::error::ApiResult;
use crate::state::AppState;

/// Triggers a flush of undelivered events.
///
/// POST /flush
pub async fn flush(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FlushRequest>,
) -> ApiResult<Json<FlushReport>> {
    info!(
        user_id = request.user_id.as_deref().unwrap_or("all"),
        dry_run = request.dry_run,
        force_delivery = request.force_delivery,
        "flush requested"
    );
    let report = state.flush.flush(&request).await?;
    Ok(Json(report))
}
