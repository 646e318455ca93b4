//! Message dispatch for the registration queue.
//!
//! Every delivery goes through decode → render → send. The [`Consumer`] never
//! returns an error to the broker loop: each failure is classified and turned
//! into a [`ProcessReport`] whose [`Disposition`] tells the loop whether to
//! acknowledge the delivery or hand it back to the broker.
//!
//! ```text
//! decode fails          → drop (dead-letter copy, ack)
//! render fails          → drop (dead-letter copy, ack)
//! send ok               → ack
//! send fails, permanent → dead-letter, ack
//! send fails, transient → backoff and retry, dead-letter once attempts run out
//! dead-letter fails     → pause, then requeue
//! shutdown in backoff   → requeue
//! ```
//!
//! Cancelling the shutdown token never interrupts a send that is already
//! talking to the transport; it only cuts backoff and requeue pauses short.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{classify, FailureClass, PublishError};
use crate::mail::{MailRenderer, Mailer};
use crate::queue::{
    MessageSink, OutboundMessage, PersonId, PersonRegistered, ATTEMPTS_HEADER,
    DEAD_LETTER_QUEUE, FAILURE_REASON_HEADER, PERSON_QUEUE, SOURCE_QUEUE_HEADER,
};
use crate::retry::RetryPolicy;

/// Pause before a message goes back to the broker after a dead-letter outage.
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// What the broker loop should do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue
    Ack,
    /// Return the message to the queue for redelivery
    Requeue,
}

/// Result of a single send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered,
    FailedTransient,
    FailedPermanent,
}

/// One call to the mailer for a given event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    pub event_id: PersonId,
    /// 1-based attempt number
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

/// Terminal state of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The welcome email was handed to the transport (or the transport is disabled)
    Delivered,
    /// The payload can never be processed and was discarded
    Dropped { reason: String },
    /// Sending failed for good; the payload now sits in the dead-letter queue
    DeadLettered { reason: String },
    /// The broker gets the message back, either because dead-lettering
    /// failed or because the worker is shutting down mid-retry
    Requeued { reason: String },
}

/// Everything that happened while processing one delivery.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub message_id: String,
    pub event_id: Option<PersonId>,
    pub attempts: Vec<DeliveryAttempt>,
    pub outcome: Outcome,
    pub disposition: Disposition,
}

impl ProcessReport {
    pub fn transient_failures(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::FailedTransient)
            .count()
    }
}

/// Drives registration events through rendering and delivery.
///
/// Shared between worker tasks behind an `Arc`; the only mutable state is the
/// consecutive failure counter used for alerting.
pub struct Consumer {
    renderer: Arc<MailRenderer>,
    mailer: Arc<Mailer>,
    dead_letters: Arc<dyn MessageSink>,
    policy: RetryPolicy,
    source_queue: String,
    dead_letter_queue: String,
    requeue_delay: Duration,
    shutdown: CancellationToken,
    consecutive_failures: AtomicU32,
}

impl Consumer {
    pub fn new(
        renderer: Arc<MailRenderer>,
        mailer: Arc<Mailer>,
        dead_letters: Arc<dyn MessageSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            renderer,
            mailer,
            dead_letters,
            policy,
            source_queue: PERSON_QUEUE.to_string(),
            dead_letter_queue: DEAD_LETTER_QUEUE.to_string(),
            requeue_delay: DEFAULT_REQUEUE_DELAY,
            shutdown: CancellationToken::new(),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Stop retrying and requeue pending deliveries once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Override the consumed queue and its dead-letter destination.
    pub fn with_queues(mut self, source: impl Into<String>, dead_letter: impl Into<String>) -> Self {
        self.source_queue = source.into();
        self.dead_letter_queue = dead_letter.into();
        self
    }

    pub fn source_queue(&self) -> &str {
        &self.source_queue
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    /// Process one delivery end to end.
    pub async fn dispatch(&self, payload: &[u8], message_id: &str) -> ProcessReport {
        let event = match PersonRegistered::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(&payload[..payload.len().min(500)]),
                    "event_decode_failed"
                );
                return self
                    .drop_message(payload, message_id, None, format!("malformed event: {e}"))
                    .await;
            }
        };

        info!(
            message_id = %message_id,
            event_id = %event.id(),
            to = %event.email(),
            "event_received"
        );

        let email = match self.renderer.render_now(&event) {
            Ok(email) => email,
            Err(e) => {
                error!(
                    message_id = %message_id,
                    event_id = %event.id(),
                    error = %e,
                    "email_render_failed"
                );
                let event_id = Some(event.id().clone());
                return self
                    .drop_message(payload, message_id, event_id, format!("render failed: {e}"))
                    .await;
            }
        };

        let mut attempts = Vec::new();
        let mut attempt = 1;

        let reason = loop {
            let result = self
                .mailer
                .send(event.email(), &email.subject, &email.body)
                .await;

            let err = match result {
                Ok(()) => {
                    attempts.push(DeliveryAttempt {
                        event_id: event.id().clone(),
                        attempt,
                        outcome: AttemptOutcome::Delivered,
                    });
                    self.consecutive_failures.store(0, Ordering::Relaxed);

                    info!(
                        message_id = %message_id,
                        event_id = %event.id(),
                        attempt = attempt,
                        "welcome_email_sent"
                    );

                    return ProcessReport {
                        message_id: message_id.to_string(),
                        event_id: Some(event.id().clone()),
                        attempts,
                        outcome: Outcome::Delivered,
                        disposition: Disposition::Ack,
                    };
                }
                Err(err) => err,
            };

            let class = classify(&err);
            attempts.push(DeliveryAttempt {
                event_id: event.id().clone(),
                attempt,
                outcome: match class {
                    FailureClass::Transient => AttemptOutcome::FailedTransient,
                    FailureClass::Permanent => AttemptOutcome::FailedPermanent,
                },
            });

            warn!(
                message_id = %message_id,
                event_id = %event.id(),
                attempt = attempt,
                class = class.as_str(),
                error = %err,
                "welcome_email_send_failed"
            );

            if class == FailureClass::Permanent {
                break format!("permanent send failure: {err}");
            }

            if !self.policy.allows_retry_after(attempt) {
                break format!("retries exhausted after {attempt} attempts: {err}");
            }

            let delay = self.policy.delay_for(attempt);
            info!(
                message_id = %message_id,
                event_id = %event.id(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "welcome_email_retry_scheduled"
            );

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(
                        message_id = %message_id,
                        event_id = %event.id(),
                        attempt = attempt,
                        "welcome_email_retry_abandoned_for_shutdown"
                    );
                    return ProcessReport {
                        message_id: message_id.to_string(),
                        event_id: Some(event.id().clone()),
                        attempts,
                        outcome: Outcome::Requeued {
                            reason: format!("shutdown during backoff: {err}"),
                        },
                        disposition: Disposition::Requeue,
                    };
                }
                _ = sleep(delay) => {}
            }
            attempt += 1;
        };

        self.dead_letter(payload, message_id, event.id().clone(), attempts, reason)
            .await
    }

    /// Discard an unprocessable payload. Acked even when the dead-letter copy fails.
    async fn drop_message(
        &self,
        payload: &[u8],
        message_id: &str,
        event_id: Option<PersonId>,
        reason: String,
    ) -> ProcessReport {
        self.record_failure(message_id, &reason);

        if let Err(e) = self.publish_dead_letter(payload, message_id, &reason, 0).await {
            warn!(
                message_id = %message_id,
                error = %e,
                "dead_letter_copy_failed"
            );
        }

        ProcessReport {
            message_id: message_id.to_string(),
            event_id,
            attempts: Vec::new(),
            outcome: Outcome::Dropped { reason },
            disposition: Disposition::Ack,
        }
    }

    /// Park a message that could not be delivered. Requeued if the dead-letter queue is unreachable.
    async fn dead_letter(
        &self,
        payload: &[u8],
        message_id: &str,
        event_id: PersonId,
        attempts: Vec<DeliveryAttempt>,
        reason: String,
    ) -> ProcessReport {
        self.record_failure(message_id, &reason);

        let attempt_count = attempts.len() as u32;
        let (outcome, disposition) = match self
            .publish_dead_letter(payload, message_id, &reason, attempt_count)
            .await
        {
            Ok(()) => {
                error!(
                    message_id = %message_id,
                    event_id = %event_id,
                    attempts = attempt_count,
                    reason = %reason,
                    "welcome_email_dead_lettered"
                );
                (Outcome::DeadLettered { reason }, Disposition::Ack)
            }
            Err(e) => {
                error!(
                    message_id = %message_id,
                    event_id = %event_id,
                    error = %e,
                    requeue_delay_ms = self.requeue_delay.as_millis() as u64,
                    "dead_letter_publish_failed"
                );
                self.pause_before_requeue().await;
                (Outcome::Requeued { reason }, Disposition::Requeue)
            }
        };

        ProcessReport {
            message_id: message_id.to_string(),
            event_id: Some(event_id),
            attempts,
            outcome,
            disposition,
        }
    }

    /// Holds the delivery so an unreachable dead-letter queue does not turn
    /// into a tight redeliver loop. Shutdown ends the pause early.
    async fn pause_before_requeue(&self) {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {}
            _ = sleep(self.requeue_delay) => {}
        }
    }

    async fn publish_dead_letter(
        &self,
        payload: &[u8],
        message_id: &str,
        reason: &str,
        attempts: u32,
    ) -> Result<(), PublishError> {
        let message = OutboundMessage::new(message_id, payload.to_vec())
            .with_header(FAILURE_REASON_HEADER, reason)
            .with_header(ATTEMPTS_HEADER, attempts.to_string())
            .with_header(SOURCE_QUEUE_HEADER, self.source_queue.as_str());

        self.dead_letters
            .publish(&self.dead_letter_queue, &message)
            .await
    }

    fn record_failure(&self, message_id: &str, reason: &str) {
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if consecutive >= 2 {
            warn!(
                message_id = %message_id,
                consecutive_failures = consecutive,
                last_reason = %reason,
                "consecutive_permanent_failures"
            );
        }
    }

    /// Number of deliveries in a row that ended without an email being sent.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
