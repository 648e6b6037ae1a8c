//! The SMTP submission state machine.
//!
//! One [`SmtpSession`] drives exactly one connection:
//!
//! 1. connect (plaintext, or implicit TLS on port 465)
//! 2. read the `220` greeting
//! 3. `EHLO`, recording the advertised [`Capabilities`]
//! 4. `STARTTLS` and a second `EHLO` when offered and not already encrypted
//! 5. `AUTH LOGIN` when credentials are configured
//! 6. `MAIL FROM`, one `RCPT TO` per recipient, `DATA`
//! 7. the dot-stuffed message, `.`, and a best-effort `QUIT`
//!
//! Every read and write is bounded by the configured [`ClientTimeouts`], and
//! the socket is released whichever step fails.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use courier_common::{config::ClientTimeouts, incoming, internal, outgoing, tracing};

use crate::{
    connection::{BoxedStream, Connection, TlsUpgrade},
    endpoint::{Credentials, Endpoint},
    error::{ClientError, Result, Stage},
    extensions::Capabilities,
    message::Message,
    response::Response,
};

/// Logged in place of AUTH LOGIN payload lines.
const AUTH_PLACEHOLDER: &str = "<credentials omitted>";

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, greeting not yet read.
    Connected,
    /// `220` greeting received.
    Greeted,
    /// `EHLO` accepted.
    Extended,
    /// `AUTH LOGIN` accepted.
    Authenticated,
    /// `MAIL FROM` accepted; recipients may be added.
    Transaction,
    /// `DATA` accepted; the message may be streamed.
    Data,
    /// Socket released.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-session settings that do not depend on the server.
#[derive(Clone)]
pub struct SessionOptions {
    /// Name sent with `EHLO`.
    pub local_hostname: String,
    pub timeouts: ClientTimeouts,
    /// Used for implicit TLS and STARTTLS. Without it STARTTLS is skipped.
    pub tls: Option<Arc<dyn TlsUpgrade>>,
}

impl SessionOptions {
    #[must_use]
    pub fn new(local_hostname: impl Into<String>) -> Self {
        Self {
            local_hostname: local_hostname.into(),
            timeouts: ClientTimeouts::default(),
            tls: None,
        }
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ClientTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_tls(mut self, tls: Arc<dyn TlsUpgrade>) -> Self {
        self.tls = Some(tls);
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("local_hostname", &self.local_hostname)
            .field("timeouts", &self.timeouts)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Await `future`, turning expiry into a [`ClientError::Timeout`] for `stage`.
async fn bounded<T>(
    stage: Stage,
    after: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(after, future)
        .await
        .map_err(|_| ClientError::Timeout { stage, after })?
}

/// Escape a message for the DATA phase.
///
/// Line endings are normalised to CRLF, every line starting with `.` gets one
/// extra leading `.`, and the result always ends with CRLF. The terminating
/// `.` line is not included.
#[must_use]
pub fn dot_stuff(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + content.len() / 64 + 2);
    let body = content
        .strip_suffix('\n')
        .map_or(content, |rest| rest.strip_suffix('\r').unwrap_or(rest));

    for line in body.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out
}

/// A single SMTP connection and its protocol state.
pub struct SmtpSession {
    connection: Option<Connection>,
    state: SessionState,
    authenticated: bool,
    capabilities: Capabilities,
    options: SessionOptions,
    server_name: String,
}

impl SmtpSession {
    /// Connect to `endpoint`, bounded by the connect timeout.
    ///
    /// For implicit-TLS endpoints the handshake happens here too.
    pub async fn connect(endpoint: &Endpoint, options: SessionOptions) -> Result<Self> {
        internal!(level = DEBUG, "Connecting to {endpoint}");

        let connection = bounded(
            Stage::Connect,
            options.timeouts.connect(),
            Connection::open(endpoint, options.tls.as_deref()),
        )
        .await?;

        Ok(Self::from_connection(connection, options, endpoint.host()))
    }

    /// Start a session over an already-open stream.
    ///
    /// `server_name` is the name used to verify the server during STARTTLS.
    #[must_use]
    pub fn from_stream(
        stream: BoxedStream,
        options: SessionOptions,
        secure: bool,
        server_name: impl Into<String>,
    ) -> Self {
        Self::from_connection(Connection::new(stream, secure), options, server_name)
    }

    fn from_connection(
        connection: Connection,
        options: SessionOptions,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            connection: Some(connection),
            state: SessionState::Connected,
            authenticated: false,
            capabilities: Capabilities::default(),
            options,
            server_name: server_name.into(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities from the most recent `EHLO`.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_secure)
    }

    fn require(&self, stage: Stage, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ClientError::OutOfOrder {
                stage,
                state: self.state.to_string(),
            })
        }
    }

    fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.connection.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    const fn reply_timeout(&self, stage: Stage) -> Duration {
        match stage {
            Stage::DataEnd => self.options.timeouts.data(),
            Stage::Quit => self.options.timeouts.quit(),
            _ => self.options.timeouts.command(),
        }
    }

    async fn write_line(&mut self, stage: Stage, line: &str) -> Result<()> {
        let after = self.reply_timeout(stage);
        let connection = self.connection_mut()?;
        bounded(stage, after, connection.send_line(line)).await
    }

    async fn read_reply(&mut self, stage: Stage) -> Result<Response> {
        let after = self.reply_timeout(stage);
        let connection = self.connection_mut()?;
        let response = bounded(stage, after, connection.read_response()).await?;
        incoming!("{} {}", response.code, response.message());
        Ok(response)
    }

    async fn command(&mut self, stage: Stage, line: &str) -> Result<Response> {
        outgoing!("{line}");
        self.write_line(stage, line).await?;
        self.read_reply(stage).await
    }

    fn expect(stage: Stage, response: Response, code: u16) -> Result<Response> {
        if response.code == code {
            Ok(response)
        } else {
            Err(ClientError::UnexpectedResponse {
                stage,
                code: response.code,
                message: response.message(),
            })
        }
    }

    /// Read the server banner. Anything but `220` is fatal.
    pub async fn greet(&mut self) -> Result<Response> {
        self.require(Stage::Greeting, &[SessionState::Connected])?;

        let response = self.read_reply(Stage::Greeting).await?;
        if response.code != 220 {
            return Err(ClientError::GreetingRejected {
                code: response.code,
                message: response.message(),
            });
        }

        self.state = SessionState::Greeted;
        Ok(response)
    }

    /// Send `EHLO` and record the advertised capabilities.
    pub async fn ehlo(&mut self) -> Result<&Capabilities> {
        self.require(Stage::Ehlo, &[SessionState::Greeted])?;

        let line = format!("EHLO {}", self.options.local_hostname);
        let response = self.command(Stage::Ehlo, &line).await?;
        let response = Self::expect(Stage::Ehlo, response, 250)?;

        self.capabilities = Capabilities::from_ehlo(&response);
        self.state = SessionState::Extended;
        Ok(&self.capabilities)
    }

    /// Upgrade the connection with `STARTTLS`.
    ///
    /// The session returns to [`SessionState::Greeted`]; `EHLO` must be sent
    /// again before anything else.
    pub async fn starttls(&mut self) -> Result<()> {
        self.require(Stage::StartTls, &[SessionState::Extended])?;

        let tls = self.options.tls.clone().ok_or_else(|| {
            ClientError::TlsError("No TLS connector configured".to_string())
        })?;
        if self.is_secure() {
            return Err(ClientError::TlsError(
                "Connection is already TLS".to_string(),
            ));
        }

        let response = self.command(Stage::StartTls, "STARTTLS").await?;
        Self::expect(Stage::StartTls, response, 220)?;

        let connection = self.connection.take().ok_or(ClientError::ConnectionClosed)?;
        let upgraded = bounded(
            Stage::StartTls,
            self.options.timeouts.command(),
            connection.upgrade(tls.as_ref(), &self.server_name),
        )
        .await;

        match upgraded {
            Ok(connection) => {
                self.connection = Some(connection);
                self.capabilities = Capabilities::default();
                self.state = SessionState::Greeted;
                internal!(level = DEBUG, "TLS negotiated with {}", self.server_name);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Authenticate with `AUTH LOGIN`.
    ///
    /// Server replies are passed through [`Credentials::redact`] before they
    /// are stored in an error, and the payload lines are never logged.
    pub async fn auth_login(&mut self, credentials: &Credentials) -> Result<()> {
        self.require(Stage::AuthLogin, &[SessionState::Extended])?;

        let response = self.command(Stage::AuthLogin, "AUTH LOGIN").await?;
        Self::expect_auth(Stage::AuthLogin, &response, 334, credentials)?;

        let response = self
            .secret_command(Stage::AuthUsername, &credentials.encoded_username())
            .await?;
        Self::expect_auth(Stage::AuthUsername, &response, 334, credentials)?;

        let response = self
            .secret_command(Stage::AuthPassword, &credentials.encoded_secret())
            .await?;
        Self::expect_auth(Stage::AuthPassword, &response, 235, credentials)?;

        self.authenticated = true;
        self.state = SessionState::Authenticated;
        Ok(())
    }

    async fn secret_command(&mut self, stage: Stage, payload: &str) -> Result<Response> {
        outgoing!("{AUTH_PLACEHOLDER}");
        self.write_line(stage, payload).await?;
        self.read_reply(stage).await
    }

    fn expect_auth(
        stage: Stage,
        response: &Response,
        code: u16,
        credentials: &Credentials,
    ) -> Result<()> {
        if response.code == code {
            return Ok(());
        }

        let message = credentials.redact(&response.message());
        if response.is_permanent_error() {
            Err(ClientError::AuthenticationRejected {
                stage,
                code: response.code,
                message,
            })
        } else {
            Err(ClientError::UnexpectedResponse {
                stage,
                code: response.code,
                message,
            })
        }
    }

    /// Open a transaction with `MAIL FROM`.
    pub async fn mail_from(&mut self, address: &str) -> Result<()> {
        self.require(
            Stage::MailFrom,
            &[SessionState::Extended, SessionState::Authenticated],
        )?;

        let response = self.command(Stage::MailFrom, &format!("MAIL FROM:<{address}>")).await?;
        Self::expect(Stage::MailFrom, response, 250)?;

        self.state = SessionState::Transaction;
        Ok(())
    }

    /// Add one recipient. Any reply but `250` fails the send.
    pub async fn rcpt_to(&mut self, address: &str) -> Result<()> {
        self.require(Stage::RcptTo, &[SessionState::Transaction])?;

        let response = self.command(Stage::RcptTo, &format!("RCPT TO:<{address}>")).await?;
        Self::expect(Stage::RcptTo, response, 250)?;
        Ok(())
    }

    /// Send `DATA` and wait for `354`.
    pub async fn data(&mut self) -> Result<()> {
        self.require(Stage::Data, &[SessionState::Transaction])?;

        let response = self.command(Stage::Data, "DATA").await?;
        Self::expect(Stage::Data, response, 354)?;

        self.state = SessionState::Data;
        Ok(())
    }

    /// Stream `content` dot-stuffed, terminate it with `.`, and wait for `250`.
    pub async fn send_message(&mut self, content: &str) -> Result<Response> {
        self.require(Stage::DataEnd, &[SessionState::Data])?;

        let mut payload = dot_stuff(content);
        payload.push_str(".\r\n");
        outgoing!("<message body, {} bytes>", payload.len());

        let after = self.options.timeouts.data();
        let connection = self.connection_mut()?;
        bounded(Stage::DataEnd, after, connection.send(payload.as_bytes())).await?;

        let response = self.read_reply(Stage::DataEnd).await?;
        let response = Self::expect(Stage::DataEnd, response, 250)?;

        self.state = if self.authenticated {
            SessionState::Authenticated
        } else {
            SessionState::Extended
        };
        Ok(response)
    }

    /// Send `QUIT` and wait briefly for the reply. Failures are only logged.
    pub async fn quit(&mut self) {
        if self.connection.is_none() {
            return;
        }

        if let Err(e) = self.command(Stage::Quit, "QUIT").await {
            internal!(level = DEBUG, "QUIT to {} failed: {e}", self.server_name);
        }
    }

    /// Release the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let _ = tokio::time::timeout(self.options.timeouts.quit(), connection.shutdown()).await;
        }
        self.state = SessionState::Closed;
    }

    /// Run greeting through end-of-data for `message`.
    ///
    /// STARTTLS is used whenever the server offers it, the connection is not
    /// already encrypted, and a TLS connector is configured. AUTH LOGIN is
    /// skipped without credentials.
    pub async fn transact(
        &mut self,
        message: &Message,
        credentials: Option<&Credentials>,
    ) -> Result<Response> {
        self.greet().await?;
        let starttls = self.ehlo().await?.starttls();

        if starttls && !self.is_secure() {
            if self.options.tls.is_some() {
                self.starttls().await?;
                self.ehlo().await?;
            } else {
                tracing::warn!(
                    server = %self.server_name,
                    "Server offers STARTTLS but no TLS connector is configured, continuing in plaintext"
                );
            }
        }

        if let Some(credentials) = credentials {
            self.auth_login(credentials).await?;
        }

        self.mail_from(&message.from().address).await?;
        for recipient in message.recipients() {
            self.rcpt_to(recipient).await?;
        }
        self.data().await?;
        self.send_message(&message.formatted()).await
    }

    /// [`SmtpSession::transact`], then `QUIT` where the protocol still allows
    /// it, then close the socket regardless of the outcome.
    pub async fn run(
        mut self,
        message: &Message,
        credentials: Option<&Credentials>,
    ) -> Result<Response> {
        let result = self.transact(message, credentials).await;

        match &result {
            Ok(_) => self.quit().await,
            Err(e) if e.allows_quit() => self.quit().await,
            Err(_) => {}
        }
        self.close().await;

        result
    }
}

/// Connect to `endpoint` and deliver `message` over one fresh session.
pub async fn send(
    endpoint: &Endpoint,
    credentials: Option<&Credentials>,
    message: &Message,
    options: SessionOptions,
) -> Result<Response> {
    SmtpSession::connect(endpoint, options)
        .await?
        .run(message, credentials)
        .await
}
