//! Pessoas Worker - async RabbitMQ consumer for welcome emails.
//!
//! This worker drains the pessoas-api queue, renders a welcome email for
//! every registered person and sends it over SMTP, retrying transient
//! failures and dead-lettering the rest.

mod worker;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pessoas::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        amqp_url_set = !config.amqp_url.is_empty(),
        queue = %config.queue_name,
        dead_letter_queue = %config.dead_letter_queue,
        concurrency = config.worker_concurrency,
        mail_enabled = config.mail_enabled,
        retry_max_attempts = config.retry_max_attempts,
        "config_loaded"
    );

    worker::run(config).await?;

    Ok(())
}
