//! Request handlers, one module per resource.

pub mod events;
pub mod flush;
pub mod health;
pub mod messages;
pub mod subscriptions;
pub mod undelivered;
pub mod users;

use courier_core::EventType;

use crate::error::ApiError;

/// Parses an `event_type` query value, case-insensitively.
pub(crate) fn parse_event_type(value: &str) -> Result<EventType, ApiError> {
    EventType::parse(&value.to_uppercase())
        .ok_or_else(|| ApiError::BadRequest(format!("unknown event_type '{value}'")))
}
