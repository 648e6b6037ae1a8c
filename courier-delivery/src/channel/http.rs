//! Shared plumbing for the HTTP provider channels.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::{ConfigError, Failure};

/// Longest slice of a provider's error body carried into a failure reason.
const MAX_ERROR_BODY: usize = 200;

pub(super) fn client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("courier/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::Http(e.to_string()))
}

/// A request that never produced a status line.
pub(super) fn transport_failure(provider: &str, error: &reqwest::Error) -> Failure {
    if error.is_timeout() {
        Failure::timeout(format!("{provider} request timed out"))
    } else {
        // reqwest errors carry the request URL; only the kind is kept
        let cause = if error.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Failure::adapter(format!("{provider} {cause}"), true)
    }
}

/// Pass 2xx responses through, turning anything else into a failure that is
/// retryable for server errors only.
pub(super) async fn check_status(provider: &str, response: Response) -> Result<Response, Failure> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();

    Err(Failure::adapter(
        format!("{provider} returned HTTP {}: {}", status.as_u16(), body.trim()),
        status.is_server_error(),
    ))
}

pub(super) fn base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}
