//! Pessoas - welcome emails for newly registered people.
//!
//! The registration API publishes a [`PersonRegistered`] event for every new
//! person; an independent worker drains the queue, renders a welcome email
//! and hands it to the mail transport. Registration never waits on SMTP.
//!
//! This library is shared by two binaries:
//! - `pessoas-worker`: RabbitMQ consumer that sends the emails
//! - `pessoas-publish`: publishes a single event from the command line
//!
//! ## Architecture
//!
//! ```text
//! Registration → Producer → pessoas-api → Consumer → MailRenderer → Mailer → SMTP
//!                                             ↘ pessoas-api.dead-letter
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod mail;
pub mod producer;
pub mod queue;
pub mod retry;
pub mod util;

// Re-export commonly used types
pub use config::{Config, SmtpTls};
pub use consumer::{
    AttemptOutcome, Consumer, DeliveryAttempt, Disposition, Outcome, ProcessReport,
    DEFAULT_REQUEUE_DELAY,
};
pub use error::{classify, FailureClass, MalformedEventError, PublishError, RenderError, SendError};
pub use mail::{MailRenderer, MailTransport, Mailer, RenderedEmail};
pub use producer::Producer;
pub use queue::{
    InMemoryBroker, MessageSink, OutboundMessage, PersonId, PersonRegistered, Publisher,
    DEAD_LETTER_QUEUE, PERSON_QUEUE,
};
pub use retry::RetryPolicy;
