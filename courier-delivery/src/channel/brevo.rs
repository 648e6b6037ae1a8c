use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use courier_common::internal;
use courier_smtp::Message;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Channel, http};
use crate::{ConfigError, Failure, Outcome, Receipt};

const BREVO_API_URL: &str = "https://api.brevo.com/v3";

/// Brevo transactional email API settings.
#[derive(Clone, Deserialize)]
pub struct BrevoConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    BREVO_API_URL.to_string()
}

const fn default_timeout_ms() -> u64 {
    30_000
}

impl BrevoConfig {
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

impl fmt::Debug for BrevoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrevoConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct BrevoAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct BrevoAttachment<'a> {
    content: String,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoRequest<'a> {
    sender: BrevoAddress<'a>,
    to: Vec<BrevoAddress<'a>>,
    subject: &'a str,
    html_content: &'a str,
    text_content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<Vec<BrevoAttachment<'a>>>,
}

impl<'a> From<&'a Message> for BrevoRequest<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            sender: BrevoAddress {
                email: &message.from().address,
                name: message.from().display_name.as_deref(),
            },
            to: message
                .recipients()
                .iter()
                .map(|email| BrevoAddress {
                    email: email.as_str(),
                    name: None,
                })
                .collect(),
            subject: message.subject(),
            html_content: message.html_body(),
            text_content: message.text_body(),
            attachment: message.attachment().map(|attachment| {
                vec![BrevoAttachment {
                    content: STANDARD.encode(&attachment.data),
                    name: &attachment.filename,
                }]
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrevoResponse {
    message_id: String,
}

/// Delivers through Brevo's `/smtp/email` endpoint.
#[derive(Debug)]
pub struct BrevoChannel {
    api_key: String,
    url: String,
    client: Client,
}

impl BrevoChannel {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BrevoConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: config.api_key.clone(),
            url: format!("{}/smtp/email", http::base_url(&config.base_url)),
            client: http::client(Duration::from_millis(config.timeout_ms))?,
        })
    }
}

#[async_trait]
impl Channel for BrevoChannel {
    fn name(&self) -> &str {
        "brevo"
    }

    async fn attempt(&self, message: &Message) -> Outcome {
        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .header("accept", "application/json")
            .json(&BrevoRequest::from(message))
            .send()
            .await
            .map_err(|e| http::transport_failure("brevo", &e))?;

        let response = http::check_status("brevo", response).await?;
        let body: BrevoResponse = response.json().await.map_err(|_| {
            Failure::adapter("brevo accepted the request but returned a malformed body", false)
        })?;

        internal!(
            level = DEBUG,
            "Brevo accepted {} as {}",
            message.message_id(),
            body.message_id
        );

        Ok(Receipt::with_id(body.message_id))
    }
}
