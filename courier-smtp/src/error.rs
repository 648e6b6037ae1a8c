//! Error types for the SMTP client.

use std::{fmt, io, time::Duration};

use thiserror::Error;

/// The exchange a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Greeting,
    Ehlo,
    StartTls,
    AuthLogin,
    AuthUsername,
    AuthPassword,
    MailFrom,
    RcptTo,
    Data,
    DataEnd,
    Quit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Greeting => "greeting",
            Self::Ehlo => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::AuthLogin => "AUTH LOGIN",
            Self::AuthUsername => "AUTH LOGIN username",
            Self::AuthPassword => "AUTH LOGIN password",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::DataEnd => "end of data",
            Self::Quit => "QUIT",
        })
    }
}

/// Errors that can occur when using the SMTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The socket could not be established.
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The server banner did not carry a 220 code.
    #[error("Server rejected connection: {code} {message}")]
    GreetingRejected { code: u16, message: String },

    /// A connect, read or write did not finish in time.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server returned a reply code other than the one the stage requires.
    #[error("Unexpected reply to {stage}: {code} {message}")]
    UnexpectedResponse {
        stage: Stage,
        code: u16,
        message: String,
    },

    /// The server refused the AUTH LOGIN exchange.
    #[error("Authentication rejected at {stage}: {code} {message}")]
    AuthenticationRejected {
        stage: Stage,
        code: u16,
        message: String,
    },

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Invalid message or session configuration.
    #[error("Invalid builder configuration: {0}")]
    BuilderError(String),

    /// A command was issued in a state that does not allow it.
    #[error("{stage} is not valid in state {state}")]
    OutOfOrder { stage: Stage, state: String },

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// Reply code carried by this error, if the server sent one.
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        match self {
            Self::GreetingRejected { code, .. }
            | Self::UnexpectedResponse { code, .. }
            | Self::AuthenticationRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether a polite `QUIT` still makes sense after this error.
    ///
    /// Rejected greetings must not see another command, and transport
    /// failures leave nothing to talk to.
    #[must_use]
    pub const fn allows_quit(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedResponse { .. } | Self::AuthenticationRejected { .. }
        )
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
