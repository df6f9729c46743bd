//! API server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::routes::create_router;
use crate::state::AppState;

/// API server.
pub struct ApiServer {
    /// Bind address, `host:port`
    addr: String,
    /// Application state
    state: Arc<AppState>,
}

impl ApiServer {
    /// Creates a new API server.
    #[must_use]
    pub fn new(addr: impl Into<String>, state: Arc<AppState>) -> Self {
        Self {
            addr: addr.into(),
            state,
        }
    }

    /// Runs the API server until the shutdown future completes, then drains
    /// open connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run.
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ApiError> {
        let app = create_router(self.state).layer(TraceLayer::new_for_http());

        let socket_addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| ApiError::Internal(format!("invalid bind address {}: {e}", self.addr)))?;

        let listener = TcpListener::bind(socket_addr)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to bind to {}: {e}", self.addr)))?;

        info!("API server listening on {}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ApiError::Internal(format!("server error: {e}")))?;

        info!("API server stopped");
        Ok(())
    }
}
