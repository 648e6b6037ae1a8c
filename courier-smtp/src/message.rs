//! Wire-ready messages: headers, an HTML body with its plain-text
//! alternative, and at most one attachment.

use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::error::{ClientError, Result};

/// Longest line a message may carry, excluding CRLF.
pub const MAX_LINE_LENGTH: usize = 998;

/// Width html2text wraps derived plain-text bodies at.
const TEXT_WIDTH: usize = 78;

/// Longest base64 payload that keeps an encoded word within 75 characters.
const ENCODED_WORD_PAYLOAD: usize = 45;

/// Width of base64 body lines.
const BASE64_LINE: usize = 76;

/// Characters that force a display name to be quoted.
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

/// An address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub address: String,
    pub display_name: Option<String>,
}

impl Mailbox {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = single_line(&name.into());
        self.display_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    /// Header form: `Name <address>` with the name quoted or encoded as needed.
    #[must_use]
    pub fn formatted(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{} <{}>", display_name(name), self.address),
            None => self.address.clone(),
        }
    }
}

/// A single binary attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    /// The attachment data.
    pub data: Vec<u8>,
}

impl Attachment {
    #[must_use]
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            filename: single_line(&filename.into()).replace('"', "'"),
            content_type: single_line(&content_type.into()),
            data,
        }
    }

    /// Read an attachment from disk, guessing its type from the extension
    /// unless one is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has no usable name.
    pub async fn from_path(path: impl AsRef<Path>, content_type: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::BuilderError("Invalid filename".to_string()))?
            .to_string();

        let data = tokio::fs::read(path).await.map_err(|e| {
            ClientError::BuilderError(format!("Failed to read file {}: {e}", path.display()))
        })?;

        let content_type = content_type.map_or_else(|| guess_content_type(path), str::to_string);

        Ok(Self::new(filename, content_type, data))
    }
}

/// A built message. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    from: Mailbox,
    to: Vec<String>,
    subject: String,
    html_body: String,
    text_body: String,
    message_id: String,
    date: DateTime<Utc>,
    attachment: Option<Attachment>,
    boundary: String,
}

impl Message {
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    #[must_use]
    pub const fn from(&self) -> &Mailbox {
        &self.from
    }

    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    #[must_use]
    pub fn text_body(&self) -> &str {
        &self.text_body
    }

    /// `<token@host>`, as written in the `Message-ID` header.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub const fn date(&self) -> DateTime<Utc> {
        self.date
    }

    #[must_use]
    pub const fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// The full RFC 5322 message: CRLF-terminated headers, a blank line, then
    /// the MIME body. No dot-stuffing is applied.
    #[must_use]
    pub fn formatted(&self) -> String {
        let mut out = String::with_capacity(
            2048 + self.html_body.len() * 2 + self.attachment.as_ref().map_or(0, |a| a.data.len() * 2),
        );

        push_header(&mut out, "Date", &self.date.to_rfc2822());
        push_header(&mut out, "From", &self.from.formatted());
        push_header(&mut out, "To", &self.to.join(", "));
        push_header(&mut out, "Subject", &encode_words(&self.subject));
        push_header(&mut out, "Message-ID", &self.message_id);
        push_header(&mut out, "MIME-Version", "1.0");

        let alternative = format!("alt{}", self.boundary);
        match &self.attachment {
            None => {
                push_header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{alternative}\""),
                );
                out.push_str("\r\n");
                self.push_alternative(&mut out, &alternative);
            }
            Some(attachment) => {
                let mixed = format!("mix{}", self.boundary);
                push_header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/mixed; boundary=\"{mixed}\""),
                );
                out.push_str("\r\n");

                out.push_str(&format!("--{mixed}\r\n"));
                push_header(
                    &mut out,
                    "Content-Type",
                    &format!("multipart/alternative; boundary=\"{alternative}\""),
                );
                out.push_str("\r\n");
                self.push_alternative(&mut out, &alternative);

                out.push_str(&format!("--{mixed}\r\n"));
                push_header(
                    &mut out,
                    "Content-Type",
                    &format!("{}; name=\"{}\"", attachment.content_type, attachment.filename),
                );
                push_header(&mut out, "Content-Transfer-Encoding", "base64");
                push_header(
                    &mut out,
                    "Content-Disposition",
                    &format!("attachment; filename=\"{}\"", attachment.filename),
                );
                out.push_str("\r\n");
                out.push_str(&wrapped_base64(&attachment.data));
                out.push_str(&format!("--{mixed}--\r\n"));
            }
        }

        out
    }

    fn push_alternative(&self, out: &mut String, boundary: &str) {
        for (content_type, body) in [("text/plain", &self.text_body), ("text/html", &self.html_body)] {
            let (encoding, encoded) = encode_body(body);
            out.push_str(&format!("--{boundary}\r\n"));
            push_header(out, "Content-Type", &format!("{content_type}; charset=utf-8"));
            push_header(out, "Content-Transfer-Encoding", encoding);
            out.push_str("\r\n");
            out.push_str(&encoded);
        }
        out.push_str(&format!("--{boundary}--\r\n"));
    }
}

/// Builder for [`Message`].
///
/// Recipient and sender addresses are validated on [`MessageBuilder::build`];
/// line breaks in the subject or display name are collapsed to spaces.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Vec<String>,
    subject: String,
    html_body: String,
    text_body: Option<String>,
    attachment: Option<Attachment>,
    hostname: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, mailbox: Mailbox) -> Self {
        self.from = Some(mailbox);
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into().trim().to_string());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = single_line(&subject.into());
        self
    }

    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html_body = html.into();
        self
    }

    /// Plain-text alternative. Derived from the HTML body when not set.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Host name used in the generated `Message-ID`.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::BuilderError` if the sender is missing, there
    /// are no recipients, or an address is malformed.
    pub fn build(self) -> Result<Message> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("Sender address is required".to_string()))?;
        validate_address(&from.address)?;

        if self.to.is_empty() {
            return Err(ClientError::BuilderError(
                "At least one recipient is required".to_string(),
            ));
        }
        for address in &self.to {
            validate_address(address)?;
        }

        let text_body = self
            .text_body
            .unwrap_or_else(|| html2text::from_read(self.html_body.as_bytes(), TEXT_WIDTH));

        let hostname = self.hostname.unwrap_or_else(crate::local_hostname);
        let token = Ulid::new();

        Ok(Message {
            from,
            to: self.to,
            subject: self.subject,
            html_body: self.html_body,
            text_body,
            message_id: format!("<{token}@{hostname}>"),
            date: Utc::now(),
            attachment: self.attachment,
            boundary: format!("_{token}"),
        })
    }
}

/// Rejects anything that could break out of a header or an SMTP command.
///
/// # Errors
///
/// Returns `ClientError::BuilderError` naming what is wrong with `address`.
pub fn validate_address(address: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(ClientError::BuilderError(format!(
            "Invalid address '{}': {reason}",
            address.escape_debug()
        )))
    };

    if address.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return invalid("contains whitespace or control characters");
    }
    if address.contains(['<', '>', ',']) {
        return invalid("contains reserved characters");
    }
    match address.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => invalid("expected local@domain"),
    }
}

fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_header(out: &mut String, name: &str, value: &str) {
    let line = format!("{name}: {value}");
    // Folded values are checked per physical line.
    for (index, physical) in line.split("\r\n").enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }
        out.push_str(truncate(physical, MAX_LINE_LENGTH));
    }
    out.push_str("\r\n");
}

/// Cut `value` to at most `max` bytes on a character boundary.
fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn display_name(name: &str) -> String {
    if !name.is_ascii() {
        encode_words(name)
    } else if name.contains(SPECIALS) || name.contains(char::is_whitespace) {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        name.to_string()
    }
}

/// RFC 2047 base64 encoded words for non-ASCII text, folded one word per line.
fn encode_words(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, ch) in text.char_indices() {
        let next = index + ch.len_utf8();
        if next - start > ENCODED_WORD_PAYLOAD {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    if start < end {
        words.push(&text[start..end]);
    }

    words
        .into_iter()
        .map(|word| format!("=?utf-8?B?{}?=", STANDARD.encode(word)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Pick a transfer encoding: 7bit for short-lined ASCII, base64 otherwise.
/// The returned body always ends with CRLF.
fn encode_body(body: &str) -> (&'static str, String) {
    let short_lines = body
        .lines()
        .all(|line| line.trim_end_matches('\r').len() <= MAX_LINE_LENGTH);

    if body.is_ascii() && short_lines {
        let mut normalized = body
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .collect::<Vec<_>>()
            .join("\r\n");
        normalized.push_str("\r\n");
        ("7bit", normalized)
    } else {
        ("base64", wrapped_base64(body.as_bytes()))
    }
}

fn wrapped_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / BASE64_LINE * 2 + 2);
    for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
        // base64 output is ASCII, so every chunk is valid UTF-8.
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
    out
}

/// Guesses the MIME content type based on file extension.
#[must_use]
pub fn guess_content_type(path: &Path) -> String {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        "ics" => "text/calendar",
        _ => "application/octet-stream",
    }
    .to_string()
}
