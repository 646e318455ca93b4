//! Mail sender: builds the outgoing message and hands it to a transport.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::Message;
use tracing::info;

use super::smtp::SmtpTransport;
use crate::config::Config;
use crate::error::SendError;

/// Something that can deliver a fully built message.
///
/// Implementations must be safe to share between worker tasks and must not
/// retry on their own.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<(), SendError>;
}

/// Sends HTML emails from a fixed sender address.
///
/// A disabled mailer accepts every send as a no-op, without building or
/// validating the message.
pub struct Mailer {
    from: Mailbox,
    transport: Option<Arc<dyn MailTransport>>,
}

impl Mailer {
    pub fn new(from: Mailbox, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            from,
            transport: Some(transport),
        }
    }

    pub fn disabled(from: Mailbox) -> Self {
        Self {
            from,
            transport: None,
        }
    }

    /// Build the mailer described by `MAIL_ENABLED` and the SMTP settings.
    pub fn from_config(config: &Config) -> Result<Self, SendError> {
        let from = parse_mailbox(&config.mail_from)?;

        if !config.mail_enabled {
            info!(from = %config.mail_from, "mail_transport_disabled");
            return Ok(Self::disabled(from));
        }

        let transport = SmtpTransport::from_config(config)?;
        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            tls = config.smtp_tls.as_str(),
            "mail_transport_configured"
        );

        Ok(Self::new(from, Arc::new(transport)))
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Build a multipart message with a single HTML part.
    pub fn build_message(&self, to: &str, subject: &str, body: &str) -> Result<Message, SendError> {
        let to = parse_mailbox(to)?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .multipart(MultiPart::mixed().singlepart(SinglePart::html(body.to_string())))?;

        Ok(message)
    }

    /// Deliver one email. Makes exactly one transport call when enabled.
    ///
    /// A disabled mailer accepts anything, including addresses lettre would reject.
    pub async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError> {
        let Some(transport) = &self.transport else {
            info!(to = %to, subject = %subject, "mail_disabled_skipped");
            return Ok(());
        };

        let message = self.build_message(to, subject, body)?;
        transport.deliver(message).await
    }
}

/// Parse an address like `user@example.com` or `Name <user@example.com>`.
pub fn parse_mailbox(address: &str) -> Result<Mailbox, SendError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| SendError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, message: Message) -> Result<(), SendError> {
            self.sent.lock().await.push(message);
            Ok(())
        }
    }

    fn from() -> Mailbox {
        parse_mailbox("no-reply@edragon.com.br").unwrap()
    }

    #[tokio::test]
    async fn test_send_delivers_once() {
        let transport = Arc::new(RecordingTransport::default());
        let mailer = Mailer::new(from(), transport.clone());

        mailer
            .send("ana@example.com", "Bem-vindo", "<p>Olá</p>")
            .await
            .unwrap();

        let sent = transport.sent.lock().await;
        assert_eq!(sent.len(), 1);

        let recipients: Vec<String> = sent[0].envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(recipients, vec!["ana@example.com".to_string()]);
        assert_eq!(
            sent[0].envelope().from().map(|a| a.to_string()),
            Some("no-reply@edragon.com.br".to_string())
        );

        let formatted = String::from_utf8_lossy(&sent[0].formatted()).to_string();
        assert!(formatted.contains("Subject: Bem-vindo"));
        assert!(formatted.contains("multipart/mixed"));
        assert!(formatted.contains("text/html"));
    }

    #[tokio::test]
    async fn test_send_rejects_invalid_recipient() {
        let transport = Arc::new(RecordingTransport::default());
        let mailer = Mailer::new(from(), transport.clone());

        let err = mailer.send("not-an-address", "s", "b").await.unwrap_err();

        assert!(matches!(err, SendError::InvalidAddress { .. }));
        assert!(transport.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_mailer_is_noop() {
        let mailer = Mailer::disabled(from());

        assert!(!mailer.is_enabled());
        mailer.send("ana@example.com", "s", "<p>b</p>").await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_mailer_skips_address_validation() {
        let mailer = Mailer::disabled(from());

        assert!(parse_mailbox("ana silva@example").is_err());
        mailer.send("ana silva@example", "s", "<p>b</p>").await.unwrap();
    }

    #[test]
    fn test_from_config_disabled() {
        let mut config = Config::from_env();
        config.mail_enabled = false;
        config.mail_from = "no-reply@edragon.com.br".to_string();

        let mailer = Mailer::from_config(&config).unwrap();
        assert!(!mailer.is_enabled());
    }

    #[test]
    fn test_parse_mailbox_with_name() {
        let mailbox = parse_mailbox("Pessoas API <no-reply@edragon.com.br>").unwrap();
        assert_eq!(mailbox.email.to_string(), "no-reply@edragon.com.br");
        assert_eq!(mailbox.name.as_deref(), Some("Pessoas API"));
    }
}
