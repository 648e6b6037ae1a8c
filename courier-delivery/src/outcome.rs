//! Where attempt outcomes go.
//!
//! The orchestrator records every attempt, successful or not, before moving
//! on. Failure reasons are sanitized before they reach an [`OutcomeLog`].

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use courier_common::audit::{self, AuditConfig};
use courier_smtp::Message;

use crate::DeliveryAttempt;

/// Sink for attempt outcomes.
///
/// `attempt_number` is 1-based and counts every channel tried for the
/// message, the queue included.
#[async_trait]
pub trait OutcomeLog: Send + Sync + std::fmt::Debug {
    /// A channel is about to be tried.
    async fn attempting(&self, _message: &Message, _channel: &str, _attempt_number: usize) {}

    /// A channel returned.
    async fn record(&self, message_id: &str, attempt_number: usize, attempt: &DeliveryAttempt);

    /// Every transport failed and the queue accepted the message.
    async fn deferred(&self, _message_id: &str, _attempts: usize) {}
}

/// Emits structured audit events through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingOutcomeLog {
    config: AuditConfig,
}

impl TracingOutcomeLog {
    #[must_use]
    pub const fn new(config: AuditConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl OutcomeLog for TracingOutcomeLog {
    async fn attempting(&self, message: &Message, channel: &str, attempt_number: usize) {
        audit::log_delivery_attempt(
            &self.config,
            message.message_id(),
            channel,
            message.recipients(),
            attempt_number,
        );
    }

    async fn record(&self, message_id: &str, attempt_number: usize, attempt: &DeliveryAttempt) {
        match &attempt.outcome {
            Ok(_) => audit::log_delivery_success(
                &self.config,
                message_id,
                &attempt.channel,
                attempt_number,
                attempt.duration.as_millis(),
            ),
            Err(failure) => audit::log_delivery_failure(
                &self.config,
                message_id,
                &attempt.channel,
                &failure.to_string(),
                attempt_number,
                failure.retryable,
            ),
        }
    }

    async fn deferred(&self, message_id: &str, attempts: usize) {
        audit::log_delivery_deferred(&self.config, message_id, attempts);
    }
}

/// One entry held by [`MemoryOutcomeLog`].
#[derive(Debug, Clone)]
pub struct LoggedAttempt {
    pub message_id: String,
    pub attempt_number: usize,
    pub attempt: DeliveryAttempt,
}

/// Append-only in-memory log.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutcomeLog {
    entries: Arc<Mutex<Vec<LoggedAttempt>>>,
}

impl MemoryOutcomeLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything recorded so far, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<LoggedAttempt> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutcomeLog for MemoryOutcomeLog {
    async fn record(&self, message_id: &str, attempt_number: usize, attempt: &DeliveryAttempt) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LoggedAttempt {
                message_id: message_id.to_string(),
                attempt_number,
                attempt: attempt.clone(),
            });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::{Failure, Receipt};

    fn attempt(channel: &str, ok: bool) -> DeliveryAttempt {
        DeliveryAttempt {
            channel: channel.to_string(),
            outcome: if ok {
                Ok(Receipt::default())
            } else {
                Err(Failure::connect("refused"))
            },
            timestamp: Utc::now(),
            duration: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_memory_log_keeps_order() {
        let log = MemoryOutcomeLog::new();
        log.record("<a@x>", 1, &attempt("smtp", false)).await;
        log.record("<a@x>", 2, &attempt("brevo", true)).await;

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].attempt.channel, "smtp");
        assert!(!entries[0].attempt.succeeded());
        assert_eq!(entries[1].attempt_number, 2);
        assert!(entries[1].attempt.succeeded());
    }

    #[tokio::test]
    async fn test_memory_log_concurrent_appends() {
        let log = MemoryOutcomeLog::new();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move {
                    log.record(&format!("<{i}@x>"), 1, &attempt("smtp", true))
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(log.len(), 16);
    }
}
