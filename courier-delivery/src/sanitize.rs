use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use courier_smtp::Credentials;

const REDACTED: &str = "[REDACTED]";

/// Scrubs configured secrets out of failure reasons before they are logged
/// or returned.
///
/// SMTP credentials are handled by [`Credentials::redact`]; other secrets
/// (API keys) are matched verbatim and in their base64 form.
#[derive(Clone, Default)]
pub struct Sanitizer {
    credentials: Vec<Credentials>,
    secrets: Vec<String>,
}

impl Sanitizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials.push(credentials);
        self
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(STANDARD.encode(secret.as_bytes()));
            self.secrets.push(secret);
            self.secrets
                .sort_by_key(|needle| std::cmp::Reverse(needle.len()));
        }
        self
    }

    /// `text` with every known secret replaced by `[REDACTED]`.
    #[must_use]
    pub fn sanitize(&self, text: &str) -> String {
        let text = self
            .credentials
            .iter()
            .fold(text.to_string(), |acc, credentials| credentials.redact(&acc));

        self.secrets
            .iter()
            .fold(text, |acc, secret| acc.replace(secret, REDACTED))
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sanitizer")
            .field("credentials", &self.credentials.len())
            .field("secrets", &(self.secrets.len() / 2))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scrubs_api_key_and_encoding() {
        let sanitizer = Sanitizer::new().with_secret("xkeysib-123");
        let encoded = STANDARD.encode("xkeysib-123");

        let cleaned = sanitizer.sanitize(&format!("bad key xkeysib-123 ({encoded})"));
        assert_eq!(cleaned, "bad key [REDACTED] ([REDACTED])");
    }

    #[test]
    fn test_scrubs_smtp_credentials() {
        let sanitizer = Sanitizer::new().with_credentials(Credentials::new("mailer", "hunter2"));
        let cleaned = sanitizer.sanitize("535 rejected mailer/hunter2");
        assert!(!cleaned.contains("hunter2"));
        assert!(!cleaned.contains("mailer"));
    }

    #[test]
    fn test_empty_secret_ignored_and_debug_hides_values() {
        let sanitizer = Sanitizer::new().with_secret("").with_secret("SG.abc");
        assert_eq!(sanitizer.sanitize("nothing here"), "nothing here");
        assert!(!format!("{sanitizer:?}").contains("SG.abc"));
    }
}
