//! SMTP transport backed by lettre's pooled async client.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::sender::MailTransport;
use crate::config::{Config, SmtpTls};
use crate::error::SendError;

/// SMTP delivery shared by every worker task.
///
/// lettre keeps a connection pool internally, so cloning is not needed to
/// send concurrently.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
    mode: SmtpTls,
}

impl SmtpTransport {
    pub fn from_config(config: &Config) -> Result<Self, SendError> {
        let host = config.smtp_host.as_str();
        let mut builder = match config.smtp_tls {
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            SmtpTls::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_millis(config.smtp_timeout_ms)));

        if let Some(username) = &config.smtp_username {
            let password = config.smtp_password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            inner: builder.build(),
            mode: config.smtp_tls,
        })
    }

    /// How connections opened by this transport are secured.
    pub fn mode(&self) -> SmtpTls {
        self.mode
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, message: Message) -> Result<(), SendError> {
        let response = self.inner.send(message).await?;

        debug!(code = %response.code(), "smtp_message_accepted");
        Ok(())
    }
}
