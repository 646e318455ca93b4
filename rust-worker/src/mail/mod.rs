//! Welcome email rendering and delivery.
//!
//! ```text
//! PersonRegistered → MailRenderer::render() → RenderedEmail → Mailer::send() → MailTransport
//! ```

pub mod render;
pub mod sender;
pub mod smtp;

pub use render::{MailRenderer, RenderedEmail, WELCOME_SUBJECT};
pub use sender::{parse_mailbox, MailTransport, Mailer};
pub use smtp::SmtpTransport;
