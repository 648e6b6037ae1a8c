use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::internal;
use courier_smtp::Message;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Channel, http};
use crate::{ConfigError, Outcome, Receipt};

const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3";

/// SendGrid v3 mail API settings.
#[derive(Clone, Deserialize)]
pub struct SendGridConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    SENDGRID_API_URL.to_string()
}

const fn default_timeout_ms() -> u64 {
    30_000
}

impl SendGridConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl fmt::Debug for SendGridConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendGridConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SendGridAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SendGridPersonalization<'a> {
    to: Vec<SendGridAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct SendGridContent<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct SendGridAttachment<'a> {
    content: String,
    #[serde(rename = "type")]
    content_type: &'a str,
    filename: &'a str,
    disposition: &'static str,
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<SendGridPersonalization<'a>>,
    from: SendGridAddress<'a>,
    subject: &'a str,
    content: Vec<SendGridContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<Vec<SendGridAttachment<'a>>>,
}

impl<'a> From<&'a Message> for SendGridRequest<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            personalizations: vec![SendGridPersonalization {
                to: message
                    .recipients()
                    .iter()
                    .map(|email| SendGridAddress {
                        email: email.as_str(),
                        name: None,
                    })
                    .collect(),
            }],
            from: SendGridAddress {
                email: &message.from().address,
                name: message.from().display_name.as_deref(),
            },
            subject: message.subject(),
            // text/plain must precede text/html
            content: vec![
                SendGridContent {
                    content_type: "text/plain",
                    value: message.text_body(),
                },
                SendGridContent {
                    content_type: "text/html",
                    value: message.html_body(),
                },
            ],
            attachments: message.attachment().map(|attachment| {
                vec![SendGridAttachment {
                    content: STANDARD.encode(&attachment.data),
                    content_type: &attachment.content_type,
                    filename: &attachment.filename,
                    disposition: "attachment",
                }]
            }),
        }
    }
}

/// Delivers through SendGrid's `/mail/send` endpoint.
#[derive(Debug)]
pub struct SendGridChannel {
    api_key: String,
    url: String,
    client: Client,
}

impl SendGridChannel {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &SendGridConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: config.api_key.clone(),
            url: format!("{}/mail/send", http::base_url(&config.base_url)),
            client: http::client(Duration::from_millis(config.timeout_ms))?,
        })
    }
}

#[async_trait]
impl Channel for SendGridChannel {
    fn name(&self) -> &str {
        "sendgrid"
    }

    async fn attempt(&self, message: &Message) -> Outcome {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&SendGridRequest::from(message))
            .send()
            .await
            .map_err(|e| http::transport_failure("sendgrid", &e))?;

        let response = http::check_status("sendgrid", response).await?;

        // 202 Accepted with an empty body; the id only travels in a header
        let provider_message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        internal!(
            level = DEBUG,
            "SendGrid accepted {} as {:?}",
            message.message_id(),
            provider_message_id
        );

        Ok(Receipt {
            provider_message_id,
        })
    }
}
