//! # Courier Core
//!
//! Core domain types for the Courier notification delivery service:
//!
//! - [`Event`] and [`EventType`]: the immutable notification records
//!   published by upstream systems
//! - [`Subscription`] and its enums: per-user delivery preferences
//! - [`Config`]: service configuration loaded from the environment
//!
//! Higher-level crates (store, engine, API, server) consume these types and
//! never redefine them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod event;
pub mod subscription;

pub use config::{Config, ConfigError, ServiceMode, SmtpConfig, StorageKind};
pub use event::{Event, EventType};
pub use subscription::{
    AggregationFrequency, AggregationMethod, DeliveryErrorStrategy, DeliveryMethod, Subscription,
    ValidationError,
};
