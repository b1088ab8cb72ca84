//! Change-event publication.
//!
//! Every committed mutation of a good is announced as the JSON-serialized
//! `Good` on a well-known topic. Publishing is fire-and-forget with respect to
//! the analytical sink: the publisher only observes whether the channel
//! accepted the message.
//!
//! # Example
//!
//! ```rust,ignore
//! use goods_manager::infrastructure::{encode_event, decode_event};
//!
//! let payload = encode_event(&good)?;
//! assert_eq!(decode_event(&payload)?, good);
//! ```

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Good;

/// Topic on which good change events are published.
pub const GOOD_EVENTS_TOPIC: &str = "logger:good";

/// Errors raised while publishing a change event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("event channel unavailable: {0}")]
    Channel(String),

    /// The in-process queue was full or closed.
    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Publishes change events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns once the channel has accepted the event.
    async fn send(&self, good: &Good) -> Result<(), PublishError>;
}

/// Serializes a good into its event payload.
///
/// # Errors
///
/// Returns `PublishError::Encode` if serialization fails.
pub fn encode_event(good: &Good) -> Result<String, PublishError> {
    serde_json::to_string(good).map_err(|error| PublishError::Encode(error.to_string()))
}

/// Parses an event payload back into a good.
///
/// # Errors
///
/// Returns the JSON error for malformed payloads.
pub fn decode_event(payload: &str) -> Result<Good, serde_json::Error> {
    serde_json::from_str(payload)
}
