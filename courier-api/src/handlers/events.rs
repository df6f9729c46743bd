//! Event publishing handler.
//!
//! Lets deployments without an attached broker feed the ingestion queue
//! through the management API. The payload is validated as an envelope and
//! then enqueued byte-for-byte, so the ingestion path sees exactly what a
//! broker would deliver.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use courier_engine::Envelope;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Publish acknowledgement.
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Always "queued".
    pub status: &'static str,
    /// Event id from the envelope.
    pub event_id: String,
}

/// Enqueues one event envelope for ingestion.
///
/// POST /events
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let Some(publisher) = &state.publisher else {
        return Err(ApiError::ServiceUnavailable(
            "this instance does not run the ingestion loop".to_string(),
        ));
    };

    let envelope =
        Envelope::parse(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    publisher
        .publish(body.to_vec())
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    info!(event_id = %envelope.event_id, "event queued for ingestion");
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            status: "queued",
            event_id: envelope.event_id,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::{test_state, test_state_with_publisher};
    use courier_engine::{InProcessQueue, MessageSource};
    use serde_json::json;

    fn payload() -> Bytes {
        Bytes::from(
            serde_json::to_vec(&json!({
                "event_id": "evt-1",
                "user_id": "u1",
                "message": "hello",
                "timestamp": "2024-05-17T10:30:00Z"
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_publish_enqueues_raw_payload() {
        let (publisher, mut queue) = InProcessQueue::new(8);
        let (_store, state) = test_state_with_publisher(Some(publisher));

        let (status, Json(response)) = publish_event(State(state), payload()).await.unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(response.status, "queued");
        assert_eq!(response.event_id, "evt-1");

        let message = queue.recv().await.unwrap();
        assert_eq!(message.payload(), payload().as_ref());
        message.ack();
    }

    #[tokio::test]
    async fn test_publish_rejects_invalid_envelope() {
        let (publisher, _queue) = InProcessQueue::new(8);
        let (_store, state) = test_state_with_publisher(Some(publisher));

        let error = publish_event(State(state), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(error, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_publish_without_ingestion_unavailable() {
        let (_store, state) = test_state();
        let error = publish_event(State(state), payload()).await.unwrap_err();
        assert!(matches!(error, ApiError::ServiceUnavailable(_)));
    }
}
