use std::{collections::HashSet, time::Duration};

use courier_common::{audit::AuditConfig, internal};
use courier_queue::QueueConfig;
use courier_smtp::Mailbox;
use serde::Deserialize;

use crate::{
    ConfigError, Mailer,
    channel::{
        BrevoChannel, BrevoConfig, Channel, ChannelKind, QueueChannel, SendGridChannel,
        SendGridConfig, SendmailChannel, SendmailConfig, SmtpChannel, SmtpConfig,
    },
    outcome::TracingOutcomeLog,
    sanitize::Sanitizer,
};

/// Default `From` identity.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Everything needed to build a [`Mailer`].
///
/// ```ron
/// (
///     sender: (address: "noreply@example.com", name: Some("Example")),
///     channels: [Smtp, Brevo],
///     smtp: Some((host: "smtp.example.com", port: 587)),
///     brevo: Some((api_key: "xkeysib-...")),
///     queue: (type: "File", path: "/var/spool/courier"),
///     deadline_ms: Some(60000),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    pub sender: SenderConfig,
    /// Name used in `EHLO` and `Message-ID`. Defaults to the system hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Transports in the order they are tried. The queue always follows.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelKind>,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub brevo: Option<BrevoConfig>,
    #[serde(default)]
    pub sendgrid: Option<SendGridConfig>,
    #[serde(default)]
    pub sendmail: Option<SendmailConfig>,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Bound on all transport attempts of one send.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_channels() -> Vec<ChannelKind> {
    vec![ChannelKind::Smtp]
}

const fn default_queue_timeout_ms() -> u64 {
    30_000
}

impl MailerConfig {
    /// Check the configuration without touching the network or the disk.
    ///
    /// # Errors
    /// - If the sender address is empty or malformed
    /// - If a channel is listed twice, or listed without its section
    pub fn validate(&self) -> Result<(), ConfigError> {
        let address = self.sender.address.trim();
        if address.is_empty() {
            return Err(ConfigError::MissingSender);
        }
        courier_smtp::validate_address(address)
            .map_err(|e| ConfigError::InvalidSender(e.to_string()))?;

        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }

        let mut seen = HashSet::new();
        for &kind in &self.channels {
            if !seen.insert(kind) {
                return Err(ConfigError::DuplicateChannel(kind));
            }

            let configured = match kind {
                ChannelKind::Smtp => self.smtp.is_some(),
                ChannelKind::Brevo => self.brevo.is_some(),
                ChannelKind::SendGrid => self.sendgrid.is_some(),
                ChannelKind::Sendmail => self.sendmail.is_some(),
            };
            if !configured {
                return Err(ConfigError::MissingChannelConfig(kind));
            }
        }

        Ok(())
    }

    /// Secrets that must never appear in a failure reason.
    #[must_use]
    pub fn sanitizer(&self) -> Sanitizer {
        let mut sanitizer = Sanitizer::new();
        if let Some(credentials) = self.smtp.as_ref().and_then(|smtp| smtp.credentials.clone()) {
            sanitizer = sanitizer.with_credentials(credentials);
        }
        if let Some(brevo) = &self.brevo {
            sanitizer = sanitizer.with_secret(&brevo.api_key);
        }
        if let Some(sendgrid) = &self.sendgrid {
            sanitizer = sanitizer.with_secret(&sendgrid.api_key);
        }
        sanitizer
    }

    /// Validate, prepare the queue store and assemble the mailer.
    ///
    /// # Errors
    /// Any [`ConfigError`]: invalid settings, a TLS or HTTP client that cannot
    /// be built, or a queue directory that cannot be prepared.
    pub async fn build(self) -> Result<Mailer, ConfigError> {
        self.validate()?;

        let hostname = self
            .hostname
            .clone()
            .unwrap_or_else(courier_smtp::local_hostname);

        let channels = self
            .channels
            .iter()
            .map(|&kind| self.channel(kind, &hostname))
            .collect::<Result<Vec<_>, _>>()?;

        let store = self.queue.clone().into_store().await?;
        let queue = QueueChannel::new(store, Duration::from_millis(self.queue_timeout_ms));

        let sender = match &self.sender.name {
            Some(name) => Mailbox::new(self.sender.address.trim()).with_name(name),
            None => Mailbox::new(self.sender.address.trim()),
        };

        let mut mailer = channels.into_iter().fold(
            Mailer::new(sender, queue)
                .with_hostname(hostname)
                .with_sanitizer(self.sanitizer())
                .with_outcome_log(std::sync::Arc::new(TracingOutcomeLog::new(
                    self.audit.clone(),
                ))),
            Mailer::with_boxed_channel,
        );
        if let Some(deadline_ms) = self.deadline_ms {
            mailer = mailer.with_deadline(Duration::from_millis(deadline_ms));
        }

        internal!(
            level = INFO,
            "Mailer ready: channels {:?}, then queue",
            mailer.channel_names()
        );

        Ok(mailer)
    }

    fn channel(&self, kind: ChannelKind, hostname: &str) -> Result<Box<dyn Channel>, ConfigError> {
        let missing = || ConfigError::MissingChannelConfig(kind);

        let channel: Box<dyn Channel> = match kind {
            ChannelKind::Smtp => Box::new(SmtpChannel::from_config(
                self.smtp.as_ref().ok_or_else(missing)?,
                hostname,
            )?),
            ChannelKind::Brevo => {
                Box::new(BrevoChannel::new(self.brevo.as_ref().ok_or_else(missing)?)?)
            }
            ChannelKind::SendGrid => Box::new(SendGridChannel::new(
                self.sendgrid.as_ref().ok_or_else(missing)?,
            )?),
            ChannelKind::Sendmail => Box::new(SendmailChannel::new(
                self.sendmail.clone().ok_or_else(missing)?,
            )),
        };
        Ok(channel)
    }
}
