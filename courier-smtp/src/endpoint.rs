//! Where a session connects to, and who it authenticates as.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;

/// Port reserved for SMTP submission over implicit TLS.
pub const IMPLICIT_TLS_PORT: u16 = 465;

const REDACTED: &str = "[REDACTED]";

/// A submission server address.
///
/// Port 465 always connects with implicit TLS; any other port starts in
/// plaintext and upgrades with STARTTLS when the server advertises it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    implicit_tls: bool,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            implicit_tls: port == IMPLICIT_TLS_PORT,
        }
    }

    /// Request implicit TLS on a non-standard port. Has no effect on 465.
    #[must_use]
    pub const fn with_implicit_tls(mut self, implicit_tls: bool) -> Self {
        self.implicit_tls = implicit_tls || self.port == IMPLICIT_TLS_PORT;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn uses_implicit_tls(&self) -> bool {
        self.implicit_tls
    }

    /// `host:port`, as used for socket connection and logging.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if self.implicit_tls {
            f.write_str(" (tls)")?;
        }
        Ok(())
    }
}

/// AUTH LOGIN credentials.
///
/// Neither field is ever printed: `Debug` redacts both, and
/// [`Credentials::redact`] scrubs both values (and their base64 forms) from
/// arbitrary text before it reaches a log.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub(crate) fn encoded_username(&self) -> String {
        STANDARD.encode(self.username.as_bytes())
    }

    pub(crate) fn encoded_secret(&self) -> String {
        STANDARD.encode(self.secret.as_bytes())
    }

    /// Scrub the credentials from `text`.
    ///
    /// The secret and both base64 encodings are replaced wherever they occur.
    /// The plain username is replaced only as a whole token, so a short name
    /// such as `mail` leaves `mail.example.com` or `mailbox` intact.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut needles = vec![
            self.secret.clone(),
            self.encoded_secret(),
            self.encoded_username(),
        ];
        needles.retain(|needle| !needle.is_empty());
        // Longest first so a value contained in another is not half-replaced.
        needles.sort_by_key(|needle| std::cmp::Reverse(needle.len()));

        let scrubbed = needles
            .iter()
            .fold(text.to_string(), |acc, needle| acc.replace(needle, REDACTED));
        redact_token(&scrubbed, &self.username)
    }
}

/// Replace `token` where it is not part of a longer word, host name or address.
fn redact_token(text: &str, token: &str) -> String {
    if token.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(token) {
        let (before, after) = (&rest[..pos], &rest[pos + token.len()..]);
        let embedded = continues_word(before.chars().rev()) || continues_word(after.chars());

        out.push_str(before);
        out.push_str(if embedded { token } else { REDACTED });
        rest = after;
    }
    out.push_str(rest);
    out
}

/// Whether the characters next to a match extend it into a larger word.
/// A `.` or `@` only counts when it joins two word characters.
fn continues_word(mut chars: impl Iterator<Item = char>) -> bool {
    match chars.next() {
        Some(c) if c.is_alphanumeric() || matches!(c, '_' | '-') => true,
        Some('.' | '@') => chars.next().is_some_and(char::is_alphanumeric),
        _ => false,
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &REDACTED)
            .field("secret", &REDACTED)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_465_is_implicit_tls() {
        assert!(Endpoint::new("smtp.example.com", 465).uses_implicit_tls());
        assert!(!Endpoint::new("smtp.example.com", 587).uses_implicit_tls());
        assert!(
            Endpoint::new("smtp.example.com", 465)
                .with_implicit_tls(false)
                .uses_implicit_tls()
        );
        assert!(
            Endpoint::new("smtp.example.com", 2465)
                .with_implicit_tls(true)
                .uses_implicit_tls()
        );
    }

    #[test]
    fn test_address() {
        assert_eq!(
            Endpoint::new("smtp.example.com", 587).address(),
            "smtp.example.com:587"
        );
    }

    #[test]
    fn test_debug_hides_credentials() {
        let credentials = Credentials::new("mailer@example.com", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("mailer@example.com"));
    }

    #[test]
    fn test_redact_plain_and_encoded() {
        let credentials = Credentials::new("mailer", "hunter2");
        let text = format!(
            "535 rejected {} / {} for mailer:hunter2",
            credentials.encoded_username(),
            credentials.encoded_secret()
        );
        let redacted = credentials.redact(&text);
        assert!(!redacted.contains("hunter2"));
        assert!(!redacted.contains("mailer"));
        assert!(!redacted.contains(&credentials.encoded_secret()));
        assert!(redacted.starts_with("535 rejected [REDACTED]"));
    }

    #[test]
    fn test_short_username_only_redacted_as_whole_word() {
        let credentials = Credentials::new("mail", "s3cret-value");
        let redacted = credentials.redact(
            "mail.example.com: 552 mailbox full for mail (user mail@relay, mail.) s3cret-value",
        );
        assert_eq!(
            redacted,
            "mail.example.com: 552 mailbox full for [REDACTED] (user mail@relay, [REDACTED].) [REDACTED]"
        );
    }

    #[test]
    fn test_encoded_username_redacted_anywhere() {
        let credentials = Credentials::new("mail", "pw");
        let text = format!("334 echo:{}", credentials.encoded_username());
        assert_eq!(credentials.redact(&text), "334 echo:[REDACTED]");
    }
}
