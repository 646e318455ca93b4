//! In-memory broker for tests and local pipelines.
//!
//! Stores published messages per queue and can play the consumer side too:
//! [`InMemoryBroker::deliver_next`] pops one message, dispatches it and
//! applies the resulting acknowledgement, just like the RabbitMQ worker does.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::types::OutboundMessage;
use super::MessageSink;
use crate::consumer::{Consumer, Disposition, ProcessReport};
use crate::error::PublishError;

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<OutboundMessage>>,
    acked: HashMap<String, usize>,
    requeued: HashMap<String, usize>,
    failing_publishes: usize,
}

/// Shared in-memory queues. Clones see the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail as if the broker were unreachable.
    pub async fn fail_next_publishes(&self, count: usize) {
        self.state.lock().await.failing_publishes = count;
    }

    /// Enqueue raw bytes, bypassing the producer.
    pub async fn push_raw(&self, queue: &str, message_id: &str, body: Vec<u8>) {
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(OutboundMessage::new(message_id, body));
    }

    /// Snapshot of the messages currently waiting on `queue`.
    pub async fn messages(&self, queue: &str) -> Vec<OutboundMessage> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.queues.get(queue).map_or(0, VecDeque::len)
    }

    /// How many deliveries from `queue` have been acknowledged.
    pub async fn acked(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.acked.get(queue).copied().unwrap_or(0)
    }

    /// How many deliveries from `queue` were handed back for redelivery.
    pub async fn requeued(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.requeued.get(queue).copied().unwrap_or(0)
    }

    /// Deliver the head of `queue` to `consumer` and apply its disposition.
    ///
    /// Returns `None` when the queue is empty.
    pub async fn deliver_next(&self, queue: &str, consumer: &Consumer) -> Option<ProcessReport> {
        let message = {
            let mut state = self.state.lock().await;
            state.queues.get_mut(queue)?.pop_front()?
        };

        let report = consumer.dispatch(&message.body, &message.message_id).await;

        let mut state = self.state.lock().await;
        match report.disposition {
            Disposition::Ack => {
                *state.acked.entry(queue.to_string()).or_default() += 1;
            }
            Disposition::Requeue => {
                *state.requeued.entry(queue.to_string()).or_default() += 1;
                state
                    .queues
                    .entry(queue.to_string())
                    .or_default()
                    .push_back(message);
            }
        }

        Some(report)
    }
}

#[async_trait]
impl MessageSink for InMemoryBroker {
    async fn publish(&self, queue: &str, message: &OutboundMessage) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(PublishError::Unavailable(format!(
                "in-memory broker refused publish to {queue}"
            )));
        }

        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message.clone());

        info!(
            queue = queue,
            message_id = %message.message_id,
            "in_memory_message_published"
        );

        Ok(())
    }
}
