use std::sync::Arc;

use async_trait::async_trait;
use courier_common::{config::ClientTimeouts, internal};
use courier_smtp::{
    Credentials, Endpoint, IMPLICIT_TLS_PORT, Message, RustlsUpgrade, SessionOptions,
};
use serde::Deserialize;

use super::Channel;
use crate::{ConfigError, Failure, Outcome, Receipt};

/// Submission server settings.
///
/// ```ron
/// smtp: (
///     host: "smtp.example.com",
///     port: 587,
///     credentials: Some((username: "mailer", secret: "...")),
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Implicit TLS on a non-standard port. Port 465 always uses implicit
    /// TLS, and `Some(false)` there is rejected by [`SmtpConfig::validate`].
    #[serde(default)]
    pub implicit_tls: Option<bool>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    /// Accept any certificate. Only for test servers.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub timeouts: ClientTimeouts,
}

const fn default_port() -> u16 {
    587
}

impl SmtpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            implicit_tls: None,
            credentials: None,
            accept_invalid_certs: false,
            timeouts: ClientTimeouts::default(),
        }
    }

    /// # Errors
    /// If plaintext is requested on the implicit TLS port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == IMPLICIT_TLS_PORT && matches!(self.implicit_tls, Some(false)) {
            return Err(ConfigError::PlaintextOnImplicitTlsPort(self.port));
        }
        Ok(())
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        let implicit_tls = self
            .implicit_tls
            .unwrap_or(self.port == IMPLICIT_TLS_PORT);
        Endpoint::new(&self.host, self.port).with_implicit_tls(implicit_tls)
    }
}

/// Delivers over one fresh SMTP session per attempt.
#[derive(Debug)]
pub struct SmtpChannel {
    endpoint: Endpoint,
    credentials: Option<Credentials>,
    options: SessionOptions,
}

impl SmtpChannel {
    #[must_use]
    pub const fn new(
        endpoint: Endpoint,
        credentials: Option<Credentials>,
        options: SessionOptions,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            options,
        }
    }

    /// Build a channel from configuration, with TLS available for STARTTLS
    /// and implicit TLS.
    ///
    /// # Errors
    /// Returns an error if the TLS client cannot be set up.
    pub fn from_config(config: &SmtpConfig, local_hostname: &str) -> Result<Self, ConfigError> {
        config.validate()?;
        let tls = RustlsUpgrade::new(config.accept_invalid_certs)
            .map_err(|e| ConfigError::Tls(e.to_string()))?;
        let options = SessionOptions::new(local_hostname)
            .with_timeouts(config.timeouts)
            .with_tls(Arc::new(tls));

        Ok(Self::new(
            config.endpoint(),
            config.credentials.clone(),
            options,
        ))
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Channel for SmtpChannel {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn attempt(&self, message: &Message) -> Outcome {
        internal!(
            level = DEBUG,
            "Submitting {} to {}",
            message.message_id(),
            self.endpoint
        );

        match courier_smtp::send(
            &self.endpoint,
            self.credentials.as_ref(),
            message,
            self.options.clone(),
        )
        .await
        {
            Ok(response) => Ok(Receipt::with_id(response.message())),
            Err(error) => {
                let failure = Failure::from(error);
                Err(match &self.credentials {
                    Some(credentials) => Failure {
                        reason: credentials.redact(&failure.reason),
                        ..failure
                    },
                    None => failure,
                })
            }
        }
    }
}
