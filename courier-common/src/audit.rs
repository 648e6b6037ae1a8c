//! Audit events for delivery outcomes
//!
//! Every channel a message is handed to produces one audit event carrying the
//! channel name, the outcome and a sanitized error string. Recipients can be
//! redacted to keep addresses out of log storage.
//!
//! ## Audit Events
//!
//! - `DeliveryAttempt`: a channel is about to be tried
//! - `DeliverySuccess`: a channel accepted the message
//! - `DeliveryFailure`: a channel failed; the orchestrator moves on
//! - `DeliveryDeferred`: every transport failed and the message was queued

use serde::{Deserialize, Serialize};

/// Target of every audit event.
pub const AUDIT_TARGET: &str = "courier::audit";

/// Audit logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Emit audit events at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Replace the local part of recipient addresses with `[REDACTED]`
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

impl AuditConfig {
    /// Recipients as they should appear in an audit event.
    #[must_use]
    pub fn recipients(&self, recipients: &[String]) -> Vec<String> {
        if self.redact_recipients {
            recipients.iter().map(|r| redact_recipient(r)).collect()
        } else {
            recipients.to_vec()
        }
    }
}

/// Keep only the domain of an address: `[REDACTED]@domain`.
///
/// Splits on the last `@`, so a quoted local part containing one is hidden too.
#[must_use]
pub fn redact_recipient(address: &str) -> String {
    address.rsplit_once('@').map_or_else(
        || REDACTED.to_string(),
        |(_, domain)| format!("{REDACTED}@{domain}"),
    )
}

const REDACTED: &str = "[REDACTED]";

/// Log that a channel is about to be tried.
///
/// `attempt` is 1-based and counts channels tried for this message.
pub fn log_delivery_attempt(
    config: &AuditConfig,
    message_id: &str,
    channel: &str,
    recipients: &[String],
    attempt: usize,
) {
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: AUDIT_TARGET,
        tracing::Level::INFO,
        event = "DeliveryAttempt",
        message_id = %message_id,
        channel = %channel,
        recipients = ?config.recipients(recipients),
        delivery_attempt = attempt,
        "Audit: Delivery attempt"
    );
}

/// Log that a channel accepted the message.
pub fn log_delivery_success(
    config: &AuditConfig,
    message_id: &str,
    channel: &str,
    attempt: usize,
    duration_ms: u128,
) {
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: AUDIT_TARGET,
        tracing::Level::INFO,
        event = "DeliverySuccess",
        message_id = %message_id,
        channel = %channel,
        delivery_attempt = attempt,
        duration_ms = duration_ms,
        "Audit: Delivery successful"
    );
}

/// Log a failed channel attempt.
///
/// `error` must already be sanitized; this function writes it verbatim.
pub fn log_delivery_failure(
    config: &AuditConfig,
    message_id: &str,
    channel: &str,
    error: &str,
    attempt: usize,
    retryable: bool,
) {
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: AUDIT_TARGET,
        tracing::Level::WARN,
        event = "DeliveryFailure",
        message_id = %message_id,
        channel = %channel,
        error = %error,
        delivery_attempt = attempt,
        retryable = retryable,
        "Audit: Delivery failed"
    );
}

/// Log that every transport failed and the message now sits in the queue.
pub fn log_delivery_deferred(config: &AuditConfig, message_id: &str, attempts: usize) {
    if !config.enabled {
        return;
    }

    tracing::event!(
        target: AUDIT_TARGET,
        tracing::Level::WARN,
        event = "DeliveryDeferred",
        message_id = %message_id,
        attempts = attempts,
        "Audit: Delivery deferred to queue"
    );
}
