use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Failure;

/// Proof that a channel accepted a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// Identifier assigned by the provider, if it reported one: the final SMTP
    /// reply text, an HTTP provider's message id, or the queue record id.
    pub provider_message_id: Option<String>,
}

impl Receipt {
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            provider_message_id: Some(id.into()),
        }
    }
}

/// The result of handing a message to one channel.
pub type Outcome = Result<Receipt, Failure>;

/// One channel tried for one message.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub channel: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

impl DeliveryAttempt {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }

    #[must_use]
    pub fn failure(&self) -> Option<&Failure> {
        self.outcome.as_ref().err()
    }
}

/// Everything the orchestrator did for one message.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub message_id: String,
    /// Name of the channel that accepted the message.
    pub delivered_via: Option<String>,
    /// Every attempt in order, the queue write included.
    pub attempts: Vec<DeliveryAttempt>,
    /// The message is sitting in the queue rather than with a transport.
    pub deferred: bool,
    /// Set when nothing, not even the queue, accepted the message.
    pub error: Option<Failure>,
}

impl DeliveryReport {
    /// Whether some channel, the queue included, accepted the message.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        self.delivered_via.is_some()
    }

    /// The most recent failed attempt, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<&Failure> {
        self.attempts.iter().rev().find_map(DeliveryAttempt::failure)
    }
}
