//! # Courier Server
//!
//! The long-lived process hosting the Courier service: the ingestion loop,
//! the management API, or both, selected by the configured service mode and
//! joined under one graceful-shutdown scope.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod server;
pub mod shutdown;

pub use server::CourierServer;
pub use shutdown::{setup_signal_handlers, ShutdownController};
