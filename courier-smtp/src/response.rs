//! SMTP reply parsing and the buffered reply reader.

use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::{ClientError, Result};

/// Initial size of the read buffer for SMTP responses.
const BUFFER_SIZE: usize = 8192;

/// Maximum size of the read buffer to prevent unbounded growth (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Represents a single line in an SMTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    /// The SMTP status code (e.g., 220, 250, 550).
    pub code: u16,
    /// Whether this is the last line in a multi-line response.
    pub is_last: bool,
    /// The message text following the status code.
    pub message: String,
}

/// Represents a complete SMTP response, which may be multi-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The SMTP status code.
    pub code: u16,
    /// All message lines in the response.
    pub lines: Vec<String>,
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Returns the complete message as a single string with lines joined by newlines.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Returns `true` if this response indicates success (2xx code).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns `true` if this response indicates a temporary error (4xx code).
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// Returns `true` if this response indicates a permanent error (5xx code).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parses a single response line (without its line terminator).
    ///
    /// The byte at offset 3 separates the code from the text: a space (or the
    /// end of the line) marks the last line, a hyphen marks a continuation.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the line doesn't match SMTP format.
    pub fn parse_line(line: &str) -> Result<ResponseLine> {
        let code_str = line.get(..3).ok_or_else(|| {
            ClientError::ParseError(format!("Response line too short: '{line}'"))
        })?;

        if !code_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::ParseError(format!(
                "Invalid status code: '{code_str}'"
            )));
        }
        let code = code_str
            .parse::<u16>()
            .map_err(|_| ClientError::ParseError(format!("Invalid status code: '{code_str}'")))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator character: '{}'",
                    char::from(*c)
                )));
            }
        };

        let message = line.get(4..).unwrap_or_default().to_string();

        Ok(ResponseLine {
            code,
            is_last,
            message,
        })
    }

    /// Parses a complete multi-line SMTP response from a buffer.
    ///
    /// Returns the parsed `Response` and the number of bytes consumed, or
    /// `None` when the buffer does not yet hold a complete reply.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` if the response is malformed.
    pub fn parse_response(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut lines = Vec::new();
        let mut consumed = 0;
        let mut first_code = None;

        while let Some(offset) = buffer[consumed..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[consumed..consumed + offset];
            consumed += offset + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let parsed = Self::parse_line(std::str::from_utf8(raw)?)?;

            match first_code {
                Some(code) if parsed.code != code => {
                    return Err(ClientError::ParseError(format!(
                        "Status code mismatch in multi-line response: expected {code}, got {}",
                        parsed.code
                    )));
                }
                Some(_) => {}
                None => first_code = Some(parsed.code),
            }

            lines.push(parsed.message);

            if parsed.is_last {
                return Ok(Some((Self::new(parsed.code, lines), consumed)));
            }
        }

        Ok(None)
    }
}

/// Assembles replies from a byte stream.
///
/// Bytes past the end of one reply stay buffered for the next call, so a
/// server that answers several commands in one segment is handled correctly.
#[derive(Debug)]
pub struct ReplyReader {
    buffer: Vec<u8>,
    buffer_pos: usize,
}

impl Default for ReplyReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyReader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
        }
    }

    /// Whether bytes beyond the last returned reply are waiting.
    #[must_use]
    pub const fn has_buffered(&self) -> bool {
        self.buffer_pos > 0
    }

    /// Reads a complete SMTP response from `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails, the peer closes the stream, or the
    /// response is malformed or larger than 1MB.
    pub async fn read<R>(&mut self, reader: &mut R) -> Result<Response>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some((response, consumed)) =
                Response::parse_response(&self.buffer[..self.buffer_pos])?
            {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let new_size = self.buffer.len() * 2;
                if new_size > MAX_BUFFER_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Response too large (exceeds {MAX_BUFFER_SIZE} bytes)"
                    )));
                }
                self.buffer.resize(new_size, 0);
            }

            let n = reader.read(&mut self.buffer[self.buffer_pos..]).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buffer_pos += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_line() {
        let line = ResponseLine {
            code: 220,
            is_last: true,
            message: "mail.example.com ESMTP".to_string(),
        };
        assert_eq!(
            Response::parse_line("220 mail.example.com ESMTP").unwrap(),
            line
        );
    }

    #[test]
    fn test_parse_multi_line_indicator() {
        let line = Response::parse_line("250-mail.example.com").unwrap();
        assert_eq!(line.code, 250);
        assert!(!line.is_last);
        assert_eq!(line.message, "mail.example.com");
    }

    #[test]
    fn test_parse_bare_code() {
        let line = Response::parse_line("354").unwrap();
        assert!(line.is_last);
        assert!(line.message.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Response::parse_line("25").is_err());
        assert!(Response::parse_line("2x0 OK").is_err());
        assert!(Response::parse_line("+25 OK").is_err());
        assert!(Response::parse_line("250_OK").is_err());
    }

    #[test]
    fn test_parse_complete_response() {
        let data = b"250 OK\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.lines, vec!["OK"]);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_parse_multi_line_response() {
        let data = b"250-mail.example.com\r\n250-SIZE 10000000\r\n250 HELP\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "SIZE 10000000", "HELP"]
        );
        assert_eq!(consumed, data.len());
    }

    #[test]
    fn test_parse_incomplete_response() {
        let data = b"250-mail.example.com\r\n250-SIZE";
        assert!(Response::parse_response(data).unwrap().is_none());
    }

    #[test]
    fn test_parse_mismatched_codes() {
        let data = b"250-first\r\n251 second\r\n";
        assert!(Response::parse_response(data).is_err());
    }

    #[test]
    fn test_parse_leaves_trailing_reply() {
        let data = b"250 OK\r\n354 go ahead\r\n";
        let (response, consumed) = Response::parse_response(data).unwrap().unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(consumed, 8);
    }

    #[test]
    fn test_is_success() {
        let response = Response::new(250, vec!["OK".to_string()]);
        assert!(response.is_success());
        assert!(!response.is_permanent_error());
    }

    #[test]
    fn test_is_error() {
        let response = Response::new(550, vec!["Error".to_string()]);
        assert!(response.is_permanent_error());
        assert!(!response.is_temporary_error());
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_reader_assembles_split_reply() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            server.write_all(b"250-mail.example.com\r\n250-STAR").await.unwrap();
            tokio::task::yield_now().await;
            server.write_all(b"TTLS\r\n250 AUTH LOGIN\r\n").await.unwrap();
            server
        });

        let mut reader = ReplyReader::new();
        let response = reader.read(&mut client).await.unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(
            response.lines,
            vec!["mail.example.com", "STARTTLS", "AUTH LOGIN"]
        );
        assert!(!reader.has_buffered());
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_reader_keeps_pipelined_bytes() {
        let mut input: &[u8] = b"220 ready\r\n250 OK\r\n";
        let mut reader = ReplyReader::new();

        let first = reader.read(&mut input).await.unwrap();
        assert_eq!(first.code, 220);
        assert!(reader.has_buffered());

        let second = reader.read(&mut input).await.unwrap();
        assert_eq!(second.code, 250);
        assert!(!reader.has_buffered());
    }

    #[tokio::test]
    async fn test_reader_reports_closed_stream() {
        let mut input: &[u8] = b"250-partial\r\n";
        let mut reader = ReplyReader::new();
        assert!(matches!(
            reader.read(&mut input).await,
            Err(ClientError::ConnectionClosed)
        ));
    }
}
