//! Typed failures for delivery attempts.
//!
//! A channel never throws: it returns a [`Failure`] by value and the
//! orchestrator moves on to the next channel. [`ConfigError`] is reserved for
//! misconfiguration discovered while building a [`crate::Mailer`].

use std::fmt;

use courier_queue::QueueError;
use courier_smtp::ClientError;
use thiserror::Error;

use crate::{channel::ChannelKind, sanitize::Sanitizer};

/// What went wrong in a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Socket or TLS establishment failed, or the server refused the session.
    Connect,
    /// Unexpected reply somewhere in the protocol exchange.
    Protocol,
    /// The server rejected the credentials.
    Authentication,
    /// A connect, read, write or overall deadline expired.
    Timeout,
    /// An HTTP provider or local program reported failure.
    Adapter,
    /// The last-resort queue write failed.
    Persistence,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect failure",
            Self::Protocol => "protocol failure",
            Self::Authentication => "authentication failure",
            Self::Timeout => "timeout",
            Self::Adapter => "adapter failure",
            Self::Persistence => "persistence failure",
        })
    }
}

/// A failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason}")]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
    /// Whether the same channel could succeed later with the same input.
    pub retryable: bool,
}

impl Failure {
    #[must_use]
    pub fn new(kind: FailureKind, reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            reason: reason.into(),
            retryable,
        }
    }

    #[must_use]
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Connect, reason, true)
    }

    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, reason, true)
    }

    #[must_use]
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Authentication, reason, false)
    }

    #[must_use]
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, reason, true)
    }

    #[must_use]
    pub fn adapter(reason: impl Into<String>, retryable: bool) -> Self {
        Self::new(FailureKind::Adapter, reason, retryable)
    }

    #[must_use]
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Persistence, reason, true)
    }

    /// Scrub configured secrets from the reason.
    #[must_use]
    pub fn sanitized(mut self, sanitizer: &Sanitizer) -> Self {
        self.reason = sanitizer.sanitize(&self.reason);
        self
    }
}

/// Classify an SMTP session error.
///
/// - Socket, TLS and greeting problems → `Connect`
/// - Expired timers → `Timeout`
/// - Rejected credentials → `Authentication` (not retryable)
/// - Any other unexpected reply or malformed response → `Protocol`
impl From<ClientError> for Failure {
    fn from(error: ClientError) -> Self {
        let reason = error.to_string();
        match error {
            ClientError::Io(_)
            | ClientError::Connect { .. }
            | ClientError::GreetingRejected { .. }
            | ClientError::TlsError(_)
            | ClientError::ConnectionClosed => Self::connect(reason),
            ClientError::Timeout { .. } => Self::timeout(reason),
            ClientError::AuthenticationRejected { .. } => Self::authentication(reason),
            ClientError::UnexpectedResponse { .. }
            | ClientError::ParseError(_)
            | ClientError::OutOfOrder { .. }
            | ClientError::Utf8Error(_) => Self::protocol(reason),
            ClientError::BuilderError(_) => Self::adapter(reason, false),
        }
    }
}

impl From<QueueError> for Failure {
    fn from(error: QueueError) -> Self {
        Self::persistence(error.to_string())
    }
}

/// Misconfiguration detected while building a mailer.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Sender address is required")]
    MissingSender,

    #[error("Invalid sender address: {0}")]
    InvalidSender(String),

    #[error("Channel {0} is listed but has no configuration section")]
    MissingChannelConfig(ChannelKind),

    #[error("Channel {0} is listed more than once")]
    DuplicateChannel(ChannelKind),

    #[error("SMTP port {0} always uses implicit TLS and cannot be set to plaintext")]
    PlaintextOnImplicitTlsPort(u16),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("HTTP client setup failed: {0}")]
    Http(String),

    #[error("Queue setup failed: {0}")]
    Queue(#[from] QueueError),
}
