//! SMTP submission client for courier.
//!
//! [`Message`] builds the wire form of a mail, [`SmtpSession`] carries it
//! over a single connection.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod extensions;
pub mod message;
pub mod response;
pub mod session;

pub use connection::{BoxedStream, Connection, RustlsUpgrade, Stream, TlsUpgrade};
pub use endpoint::{Credentials, Endpoint, IMPLICIT_TLS_PORT};
pub use error::{ClientError, Result, Stage};
pub use extensions::Capabilities;
pub use message::{Attachment, Mailbox, Message, MessageBuilder, validate_address};
pub use response::{ReplyReader, Response};
pub use session::{SessionOptions, SessionState, SmtpSession, dot_stuff, send};

/// The name this host introduces itself with, falling back to `localhost`.
#[must_use]
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
