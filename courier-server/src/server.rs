//! Server assembly and task orchestration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info};

use courier_api::{ApiServer, AppState};
use courier_core::{Config, StorageKind};
use courier_engine::{DeliveryService, FlushEngine, InProcessQueue, IngestProcessor};
use courier_store::{EventStore, FileEventStore, MemoryEventStore};

use crate::shutdown::{setup_signal_handlers, ShutdownController};

/// How long in-flight ingestion work may finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// The assembled Courier service process.
///
/// All collaborators are constructed once here and injected into the tasks
/// the configured service mode selects.
pub struct CourierServer {
    config: Config,
}

impl CourierServer {
    /// Creates a server from loaded configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Runs the service until a SIGINT/SIGTERM arrives, then shuts down
    /// gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error when a component cannot be constructed, e.g. an
    /// unusable data directory or SMTP relay host.
    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = ShutdownController::new();
        tokio::spawn(setup_signal_handlers(shutdown.clone()));
        self.run_with_controller(shutdown).await
    }

    /// Runs the service against an externally-owned shutdown controller.
    ///
    /// # Errors
    ///
    /// Same contract as [`CourierServer::run`].
    pub async fn run_with_controller(self, shutdown: ShutdownController) -> anyhow::Result<()> {
        let config = self.config;

        let store = build_store(&config)?;
        let delivery = Arc::new(
            DeliveryService::new(&config.smtp).context("failed to set up delivery providers")?,
        );
        let flush = Arc::new(FlushEngine::new(
            Arc::clone(&store),
            Arc::clone(&delivery),
            config.smtp.default_sender.clone(),
        ));

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let publisher = if config.service_mode.consumes_events() {
            let (publisher, queue) = InProcessQueue::new(config.queue_capacity);
            let processor = Arc::new(IngestProcessor::new(
                Arc::clone(&store),
                Arc::clone(&delivery),
                config.smtp.default_sender.clone(),
            ));
            let rx = shutdown.subscribe();
            info!(
                subscription = %config.subscription_name,
                queue_capacity = config.queue_capacity,
                "starting ingestion loop"
            );
            tasks.push(tokio::spawn(async move {
                processor.run(Box::new(queue), rx, SHUTDOWN_GRACE).await;
            }));
            Some(publisher)
        } else {
            None
        };

        if config.service_mode.serves_api() {
            let state = Arc::new(AppState::new(Arc::clone(&store), flush, publisher));
            let server = ApiServer::new(config.bind_address(), state);
            let signal = shutdown.clone();
            let on_error = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let wait = async move { signal.wait_for_shutdown().await };
                if let Err(e) = server.run_with_shutdown(wait).await {
                    error!(error = %e, "API server failed");
                    // Take the whole process down rather than limp along.
                    on_error.initiate_shutdown();
                }
            }));
        }

        info!(mode = %config.service_mode, "courier server started");

        for task in tasks {
            let _ = task.await;
        }

        info!("courier server stopped");
        Ok(())
    }
}

fn build_store(config: &Config) -> anyhow::Result<Arc<dyn EventStore>> {
    match config.storage {
        StorageKind::File => {
            let store = FileEventStore::open(&config.data_dir).with_context(|| {
                format!("failed to open data directory {}", config.data_dir.display())
            })?;
            Ok(Arc::new(store))
        }
        StorageKind::Memory => Ok(Arc::new(MemoryEventStore::new())),
    }
}
