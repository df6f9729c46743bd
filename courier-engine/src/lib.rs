//! # Courier Engine
//!
//! The event-processing engine of the Courier notification service:
//!
//! - [`aggregate`]: renders a set of events into one message body (plain
//!   text, HTML, or multipart MIME)
//! - [`delivery`]: SMTP and webhook delivery providers behind a uniform
//!   send contract
//! - [`source`]: the pub/sub seam, message sources with ack/nack and
//!   at-least-once redelivery
//! - [`ingest`]: the bounded-concurrency ingestion processor routing each
//!   inbound event to immediate delivery or storage
//! - [`flush`]: on-demand batch delivery of accumulated events with
//!   clear-after-deliver semantics

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod delivery;
pub mod envelope;
pub mod flush;
pub mod ingest;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregate::{render, ContentKind, RenderedMessage};
pub use delivery::{DeliveryOutcome, DeliveryProvider, DeliveryService, ProviderError};
pub use envelope::{Envelope, EnvelopeError, EnvelopeTarget};
pub use flush::{FlushEngine, FlushReport, FlushRequest};
pub use ingest::IngestProcessor;
pub use source::{InProcessQueue, InboundMessage, MessageSource, PublishError, QueuePublisher};
