//! Pessoas Publish - publish one registration event.
//!
//! Usage: `pessoas-publish <id> <nome> <email>`
//!
//! Stands in for the registration API when the pipeline is operated by hand.
//! Exits non-zero when the broker does not accept the event.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pessoas::{Config, PersonId, PersonRegistered, Producer, Publisher};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [id, name, email] = args.as_slice() else {
        bail!("usage: pessoas-publish <id> <nome> <email>");
    };

    let config = Config::from_env();
    info!(queue = %config.queue_name, "publisher_starting");

    let event = PersonRegistered::new(parse_id(id), name.as_str(), email.as_str());

    let publisher = Publisher::new(config.amqp_url.clone(), vec![config.queue_name.clone()]);
    let producer =
        Producer::new(Arc::new(publisher.clone())).with_queue(config.queue_name.clone());

    let result = producer
        .publish(&event)
        .await
        .with_context(|| format!("Failed to publish event {}", event.id()));

    publisher.close().await;
    result
}

/// Numeric ids stay numeric on the wire; anything else is sent as text.
fn parse_id(raw: &str) -> PersonId {
    raw.parse::<i64>()
        .map(PersonId::Number)
        .unwrap_or_else(|_| PersonId::Text(raw.to_string()))
}
