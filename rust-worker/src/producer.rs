//! Registration event producer.
//!
//! Called synchronously by the registration workflow after a person has been
//! stored. Encodes the event and publishes it once; retrying or compensating
//! is left to the caller.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::PublishError;
use crate::queue::{MessageSink, OutboundMessage, PersonRegistered, PERSON_QUEUE};

/// Publishes [`PersonRegistered`] events to a single fixed queue.
#[derive(Clone)]
pub struct Producer {
    sink: Arc<dyn MessageSink>,
    queue: String,
}

impl Producer {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sink,
            queue: PERSON_QUEUE.to_string(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish one event. Enqueues exactly one message on success and nothing on failure.
    pub async fn publish(&self, event: &PersonRegistered) -> Result<(), PublishError> {
        let body = event.encode()?;
        let message = OutboundMessage::new(event.id().to_string(), body);

        if let Err(e) = self.sink.publish(&self.queue, &message).await {
            error!(
                queue = %self.queue,
                event_id = %event.id(),
                error = %e,
                "person_registered_publish_failed"
            );
            return Err(e);
        }

        info!(
            queue = %self.queue,
            event_id = %event.id(),
            "person_registered_published"
        );

        Ok(())
    }
}
