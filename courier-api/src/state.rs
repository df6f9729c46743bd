//! Application state for the API server.

use std::sync::Arc;

use courier_engine::{FlushEngine, QueuePublisher};
use courier_store::EventStore;

/// Shared application state.
///
/// Everything is constructed once at startup and injected; handlers never
/// build their own collaborators.
pub struct AppState {
    /// Event and subscription store.
    pub store: Arc<dyn EventStore>,
    /// Flush engine backing `POST /flush`.
    pub flush: Arc<FlushEngine>,
    /// Publishing half of the in-process queue backing `POST /events`;
    /// absent when this process does not run the ingestion loop.
    pub publisher: Option<QueuePublisher>,
}

impl AppState {
    /// Creates the application state.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        flush: Arc<FlushEngine>,
        publisher: Option<QueuePublisher>,
    ) -> Self {
        Self {
            store,
            flush,
            publisher,
        }
    }
}
