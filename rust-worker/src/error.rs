//! Error taxonomy for the registration notification pipeline.
//!
//! Producer failures surface to the caller as [`PublishError`]. Everything the
//! consumer hits is classified into a [`FailureClass`] and handled inside the
//! worker, never propagated back to the broker.

use thiserror::Error;

/// A queue payload could not be decoded into a registration event.
///
/// Always permanent: redelivering the same bytes can never succeed.
#[derive(Debug, Error)]
pub enum MalformedEventError {
    #[error("payload is not a valid event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event field `{0}` is empty")]
    EmptyField(&'static str),
}

/// Publishing an event to the broker failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker call failed: {0}")]
    Broker(#[from] lapin::Error),

    #[error("broker did not confirm message on queue {queue}")]
    NotConfirmed { queue: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Rendering the welcome email failed. Treated as permanent.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid template: {0}")]
    Template(#[from] handlebars::TemplateError),

    #[error("failed to render template: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// The mail transport failed to deliver a message.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    /// The server answered with a permanent (5xx) reply.
    #[error("smtp server rejected message: {0}")]
    Rejected(String),

    /// Connection, TLS, timeout or transient (4xx) reply.
    #[error("smtp transport unavailable: {0}")]
    Unavailable(String),
}

impl From<lettre::transport::smtp::Error> for SendError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_permanent() {
            SendError::Rejected(err.to_string())
        } else {
            SendError::Unavailable(err.to_string())
        }
    }
}

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Permanent => "permanent",
        }
    }
}

/// Map a transport failure onto the retry decision.
pub fn classify(err: &SendError) -> FailureClass {
    match err {
        SendError::Unavailable(_) => FailureClass::Transient,
        SendError::InvalidAddress { .. } | SendError::Message(_) | SendError::Rejected(_) => {
            FailureClass::Permanent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unavailable_is_transient() {
        let err = SendError::Unavailable("connection refused".to_string());
        assert_eq!(classify(&err), FailureClass::Transient);
    }

    #[test]
    fn test_classify_rejections_are_permanent() {
        let rejected = SendError::Rejected("550 mailbox unavailable".to_string());
        assert_eq!(classify(&rejected), FailureClass::Permanent);

        let invalid = SendError::InvalidAddress {
            address: "nope".to_string(),
            reason: "missing domain".to_string(),
        };
        assert_eq!(classify(&invalid), FailureClass::Permanent);
    }

    #[test]
    fn test_malformed_event_message() {
        let err = MalformedEventError::EmptyField("email");
        assert_eq!(err.to_string(), "event field `email` is empty");
    }
}
