//! # Courier API
//!
//! HTTP management surface over the store and flush engine: inspection of
//! undelivered events, subscription CRUD, flush triggering, and event
//! publishing for deployments without an attached broker. The API adds no
//! business logic beyond input validation; everything else delegates to the
//! store and the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::ApiServer;
pub use state::AppState;
