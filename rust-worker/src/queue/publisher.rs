//! Async RabbitMQ publisher.
//!
//! Keeps one connection and confirm-mode channel that is shared across tasks
//! and re-established on the next publish after the broker drops it.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::types::OutboundMessage;
use super::MessageSink;
use crate::error::PublishError;

/// Async RabbitMQ publisher with connection management.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    queues: Vec<String>,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl Publisher {
    /// Create a publisher that declares `queues` (durable) on every connect.
    pub fn new(url: String, queues: Vec<String>) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                queues,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, PublishError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default()).await?;

        info!("rabbitmq_publisher_connected");

        let ch = conn.create_channel().await?;
        ch.confirm_select(ConfirmSelectOptions::default()).await?;

        for queue in &self.inner.queues {
            ch.queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        }

        info!(queues = ?self.inner.queues, "rabbitmq_queues_declared");

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

fn properties_for(message: &OutboundMessage) -> BasicProperties {
    let mut properties = BasicProperties::default()
        .with_delivery_mode(2) // Persistent
        .with_content_type("application/json".into())
        .with_content_encoding("utf-8".into())
        .with_message_id(message.message_id.clone().into());

    if !message.headers.is_empty() {
        let mut headers = FieldTable::default();
        for (name, value) in &message.headers {
            headers.insert(
                name.clone().into(),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        properties = properties.with_headers(headers);
    }

    properties
}

#[async_trait]
impl MessageSink for Publisher {
    async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), PublishError> {
        let channel = self.ensure_connected().await?;

        let confirmation = channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                properties_for(message),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::NotConfirmed {
                queue: queue.to_string(),
            });
        }

        info!(
            queue = queue,
            message_id = %message.message_id,
            body_length = message.body.len(),
            "rabbitmq_message_published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publisher_creation() {
        let publisher = Publisher::new(
            "amqp://localhost:5672".to_string(),
            vec!["pessoas-api".to_string()],
        );
        assert!(Arc::strong_count(&publisher.inner) == 1);
        assert_eq!(publisher.inner.queues, vec!["pessoas-api".to_string()]);
    }

    #[test]
    fn test_properties_carry_headers() {
        let message = OutboundMessage::new("42", b"{}".to_vec()).with_header("x-attempts", "3");

        let properties = properties_for(&message);

        assert_eq!(
            properties.message_id().as_ref().map(|id| id.as_str()),
            Some("42")
        );
        assert_eq!(properties.delivery_mode(), &Some(2));
        let headers = properties.headers().as_ref().unwrap();
        assert!(headers.inner().keys().any(|key| key.as_str() == "x-attempts"));
    }
}
