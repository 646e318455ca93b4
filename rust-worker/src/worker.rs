//! RabbitMQ consumer loop using lapin.
//!
//! Connects to RabbitMQ, consumes the registration queue and spawns one task
//! per delivery. Each task runs the shared [`Consumer`] and then acks or
//! requeues according to the returned disposition.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use pessoas::util::shutdown_signal;
use pessoas::{Config, Consumer, Disposition, MailRenderer, Mailer, Publisher};

const CONSUMER_TAG: &str = "pessoas-worker";

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Builds the renderer, mailer and dead-letter publisher once
/// 2. Connects to RabbitMQ and sets QoS prefetch to the worker concurrency
/// 3. Declares the registration queue (idempotent operation)
/// 4. Consumes messages, spawning a task for each
/// 5. On SIGINT/SIGTERM stops consuming, drains in-flight tasks and disconnects
///
/// In-flight tasks are never aborted: a send that already reached the SMTP
/// server finishes and gets settled. Tasks waiting in backoff requeue instead.
pub async fn run(config: Config) -> Result<()> {
    let renderer = MailRenderer::new().context("Failed to compile email template")?;
    let mailer = Mailer::from_config(&config).context("Failed to configure mailer")?;
    let dead_letters = Publisher::new(config.amqp_url.clone(), vec![config.dead_letter_queue.clone()]);

    let stopping = CancellationToken::new();

    let consumer = Arc::new(
        Consumer::new(
            Arc::new(renderer),
            Arc::new(mailer),
            Arc::new(dead_letters.clone()),
            config.retry_policy(),
        )
        .with_queues(config.queue_name.clone(), config.dead_letter_queue.clone())
        .with_requeue_delay(config.requeue_delay())
        .with_shutdown(stopping.clone()),
    );

    info!(url_length = config.amqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.amqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    let prefetch_count = config.prefetch_count();
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    channel
        .queue_declare(
            &config.queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare queue")?;

    info!(queue = %config.queue_name, "rabbitmq_queue_declared");

    let mut deliveries = channel
        .basic_consume(
            &config.queue_name,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = %config.queue_name, "rabbitmq_consumer_started");
    info!("worker_ready");

    let channel = Arc::new(channel);
    let mut in_flight = JoinSet::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "worker_task_panicked");
                }
            }
            delivery = deliveries.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let delivery_tag = delivery.delivery_tag;
                        let message_id = delivery
                            .properties
                            .message_id()
                            .as_ref()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "unknown".to_string());

                        info!(
                            queue = %config.queue_name,
                            message_id = %message_id,
                            delivery_tag = delivery_tag,
                            redelivered = delivery.redelivered,
                            "rabbitmq_message_received"
                        );

                        let consumer = Arc::clone(&consumer);
                        let channel = Arc::clone(&channel);

                        in_flight.spawn(async move {
                            let report = consumer.dispatch(&delivery.data, &message_id).await;
                            settle(&channel, delivery_tag, &message_id, report.disposition).await;
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
        }
    }

    // Pending backoffs end now and their deliveries are requeued
    stopping.cancel();

    // Stop receiving new messages before draining
    if let Err(e) = channel
        .basic_cancel(CONSUMER_TAG, BasicCancelOptions::default())
        .await
    {
        warn!(error = %e, "rabbitmq_cancel_failed");
    }

    info!(in_flight = in_flight.len(), "worker_draining");

    let drained = tokio::time::timeout(config.shutdown_timeout(), drain(&mut in_flight)).await;

    if drained.is_err() {
        // Only sends still talking to SMTP remain; each is bounded by SMTP_TIMEOUT_MS
        warn!(
            remaining = in_flight.len(),
            smtp_timeout_ms = config.smtp_timeout_ms,
            "worker_drain_slow"
        );
        drain(&mut in_flight).await;
    }

    if let Err(e) = channel.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_channel_close_error");
    }
    if let Err(e) = conn.close(200, "Normal shutdown").await {
        warn!(error = %e, "rabbitmq_connection_close_error");
    }
    dead_letters.close().await;

    info!("worker_shutdown_complete");
    Ok(())
}

async fn drain(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "worker_task_panicked");
        }
    }
}

/// Acknowledge or requeue a delivery.
async fn settle(channel: &Channel, delivery_tag: u64, message_id: &str, disposition: Disposition) {
    let result = match disposition {
        Disposition::Ack => {
            channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
        }
        Disposition::Requeue => {
            channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    },
                )
                .await
        }
    };

    match result {
        Ok(()) => info!(
            message_id = %message_id,
            disposition = ?disposition,
            "rabbitmq_message_settled"
        ),
        Err(e) => error!(
            delivery_tag = delivery_tag,
            message_id = %message_id,
            error = %e,
            "rabbitmq_settle_failed"
        ),
    }
}
