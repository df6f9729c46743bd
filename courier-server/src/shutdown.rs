//! Graceful shutdown handling.
//!
//! One shutdown signal fans out to every long-lived task: the ingestion
//! loop stops pulling and drains, the HTTP server stops accepting and
//! drains. Components subscribe before starting and race their work against
//! the broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

/// Shutdown controller for coordinating graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    /// Whether shutdown has been initiated.
    shutdown_initiated: Arc<AtomicBool>,
    /// Sender for shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    /// Creates a new shutdown controller.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Initiates shutdown, notifying all subscribers. Idempotent.
    pub fn initiate_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("shutdown initiated");
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Returns whether shutdown has been initiated.
    #[must_use]
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Returns a receiver for shutdown signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Completes when shutdown is initiated.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_initiated() {
            return;
        }
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.recv().await;
    }
}

/// Listens for SIGINT (Ctrl+C) and SIGTERM and initiates shutdown.
pub async fn setup_signal_handlers(controller: ShutdownController) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).expect("failed to set up SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to set up SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
        }

        controller.initiate_shutdown();
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to set up Ctrl+C handler");
        info!("received Ctrl+C");
        controller.initiate_shutdown();
    }
}
