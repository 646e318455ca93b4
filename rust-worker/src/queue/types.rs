//! Queue message types.
//!
//! This module defines:
//! - the `pessoas-api` queue and its dead-letter companion
//! - [`PersonRegistered`], the event carried on that queue
//! - [`OutboundMessage`], a broker-agnostic message ready to publish

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;

/// Queue name for person registration events.
pub const PERSON_QUEUE: &str = "pessoas-api";

/// Queue name for events that could not be delivered.
pub const DEAD_LETTER_QUEUE: &str = "pessoas-api.dead-letter";

/// Header carrying the reason a message was dead-lettered.
pub const FAILURE_REASON_HEADER: &str = "x-failure-reason";

/// Header carrying the number of send attempts made before dead-lettering.
pub const ATTEMPTS_HEADER: &str = "x-attempts";

/// Header carrying the queue a dead-lettered message was consumed from.
pub const SOURCE_QUEUE_HEADER: &str = "x-source-queue";

// =============================================================================
// Registration Event (pessoas-api queue)
// =============================================================================

/// Opaque identifier of a registered person.
///
/// Upstream producers emit either numeric or textual (UUID) identifiers, so
/// both are accepted and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonId {
    Number(i64),
    Text(String),
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonId::Number(n) => write!(f, "{n}"),
            PersonId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PersonId {
    fn from(value: i64) -> Self {
        PersonId::Number(value)
    }
}

impl From<String> for PersonId {
    fn from(value: String) -> Self {
        PersonId::Text(value)
    }
}

impl From<&str> for PersonId {
    fn from(value: &str) -> Self {
        PersonId::Text(value.to_string())
    }
}

/// A person was registered and should receive a welcome email.
///
/// Field names on the wire match the registration API (`nome`, not `name`).
/// Unknown fields are ignored so the API can grow its payload freely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRegistered {
    id: PersonId,
    #[serde(rename = "nome")]
    name: String,
    email: String,
}

impl PersonRegistered {
    pub fn new(id: impl Into<PersonId>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn id(&self) -> &PersonId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Encode into the canonical JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a queue payload, rejecting missing, mistyped or blank fields.
    pub fn decode(payload: &[u8]) -> Result<Self, MalformedEventError> {
        let event: PersonRegistered = serde_json::from_slice(payload)?;

        if event.name.trim().is_empty() {
            return Err(MalformedEventError::EmptyField("nome"));
        }
        if event.email.trim().is_empty() {
            return Err(MalformedEventError::EmptyField("email"));
        }

        Ok(event)
    }
}

// =============================================================================
// Outbound Messages
// =============================================================================

/// A message ready to be handed to a broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message identifier used for log correlation
    pub message_id: String,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Extra string headers
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(message_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            body,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
