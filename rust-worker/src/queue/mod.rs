//! Queue module for broker operations.
//!
//! This module provides:
//! - The registration event and queue names
//! - [`MessageSink`], the publish contract shared by every broker backend
//! - A RabbitMQ publisher and an in-memory broker for tests
//!
//! ## Architecture
//!
//! ```text
//! Producer → pessoas-api queue → Consumer → (failures) → pessoas-api.dead-letter
//! ```

pub mod memory;
pub mod publisher;
pub mod types;

use async_trait::async_trait;

use crate::error::PublishError;

pub use memory::InMemoryBroker;
pub use publisher::Publisher;
pub use types::{
    OutboundMessage, PersonId, PersonRegistered, ATTEMPTS_HEADER, DEAD_LETTER_QUEUE,
    FAILURE_REASON_HEADER, PERSON_QUEUE, SOURCE_QUEUE_HEADER,
};

/// Publish side of a broker.
///
/// Returns once the broker has accepted the message; a single attempt per call.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), PublishError>;
}
