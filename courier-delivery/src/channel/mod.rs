//! Delivery channels.
//!
//! A channel takes a built [`Message`] and either hands it to something that
//! accepted it or reports a typed [`crate::Failure`]. Channels hold only their
//! configuration: each attempt opens whatever connection, request or process
//! it needs and releases it before returning.

mod brevo;
mod http;
mod queue;
mod sendgrid;
mod sendmail;
mod smtp;

use std::fmt;

use async_trait::async_trait;
use courier_smtp::Message;
use serde::{Deserialize, Serialize};

pub use brevo::{BrevoChannel, BrevoConfig};
pub use queue::QueueChannel;
pub use sendgrid::{SendGridChannel, SendGridConfig};
pub use sendmail::{SendmailChannel, SendmailConfig};
pub use smtp::{SmtpChannel, SmtpConfig};

use crate::Outcome;

/// A transport the orchestrator can try.
#[async_trait]
pub trait Channel: Send + Sync + fmt::Debug {
    /// Stable name used in attempt records and logs.
    fn name(&self) -> &str;

    /// Try to hand `message` over once. Never panics and never retries.
    async fn attempt(&self, message: &Message) -> Outcome;
}

/// The transports that can appear in the configured channel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Smtp,
    Brevo,
    SendGrid,
    Sendmail,
}

impl ChannelKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Smtp => "smtp",
            Self::Brevo => "brevo",
            Self::SendGrid => "sendgrid",
            Self::Sendmail => "sendmail",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
