//! Delivery orchestration for courier.
//!
//! A [`Mailer`] hands each message to an ordered list of [`Channel`]s (SMTP,
//! HTTP providers, a local submission program) and falls back to a queue
//! when none of them accepts it:
//!
//! ```text
//! smtp ─fail─▶ brevo ─fail─▶ sendgrid ─fail─▶ queue
//!   │            │              │               │
//!   ok           ok             ok          ok / fail
//! ```
//!
//! Every attempt is recorded through an [`OutcomeLog`] with secrets scrubbed
//! from its failure reason.

pub mod channel;
pub mod config;
pub mod error;
pub mod mailer;
pub mod outcome;
pub mod sanitize;
pub mod types;

pub use channel::{
    BrevoChannel, BrevoConfig, Channel, ChannelKind, QueueChannel, SendGridChannel,
    SendGridConfig, SendmailChannel, SendmailConfig, SmtpChannel, SmtpConfig,
};
pub use config::{MailerConfig, SenderConfig};
pub use error::{ConfigError, Failure, FailureKind};
pub use mailer::Mailer;
pub use outcome::{LoggedAttempt, MemoryOutcomeLog, OutcomeLog, TracingOutcomeLog};
pub use sanitize::Sanitizer;
pub use types::{DeliveryAttempt, DeliveryReport, Outcome, Receipt};
