//! Scriptable SMTP server on a loopback port.
#![allow(dead_code)] // not every test uses every knob
//!
//! Replies to each command with a configurable code, understands the three
//! steps of `AUTH LOGIN`, records what it received, and can stall to exercise
//! client timeouts.
//!
//! ```rust,no_run
//! let server = MockSmtpServer::builder()
//!     .with_auth("mailer", "hunter2")
//!     .with_rcpt_to_response(550, "No such user")
//!     .build()
//!     .await?;
//! ```

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the server saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    /// Decoded username and secret of a completed `AUTH LOGIN`.
    AuthLogin(String, String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Message lines between `DATA` and the lone dot, still dot-stuffed.
    MessageContent(String),
    Quit,
    Other(String),
}

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    message: String,
}

impl Reply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    capabilities: Vec<String>,
    credentials: Option<(String, String)>,
    mail_from: Reply,
    rcpt_to: Reply,
    data: Reply,
    data_end: Reply,
    /// Stay silent instead of greeting.
    stall_greeting: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock.test ESMTP ready"),
            capabilities: vec!["mock.test".to_string(), "SIZE 10000000".to_string()],
            credentials: None,
            mail_from: Reply::new(250, "OK"),
            rcpt_to: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "2.0.0 Ok: queued as MOCK1"),
            stall_greeting: false,
        }
    }
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// The body of the first message received, if any.
    pub async fn message(&self) -> Option<String> {
        self.commands.read().await.iter().find_map(|command| match command {
            SmtpCommand::MessageContent(content) => Some(content.clone()),
            _ => None,
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn read_command(
        reader: &mut BufReader<tokio::net::tcp::ReadHalf<'_>>,
    ) -> Result<Option<String>, BoxError> {
        let mut line = String::new();
        let read = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await??;
        Ok((read > 0).then(|| line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn handle_client(
        mut stream: TcpStream,
        script: Arc<Script>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), BoxError> {
        if script.stall_greeting {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }

        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);

        writer.write_all(&script.greeting.to_bytes()).await?;
        if script.greeting.code != 220 {
            return Ok(());
        }

        while let Some(line) = Self::read_command(&mut reader).await? {
            let (verb, argument) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            let (reply, command) = match verb.to_uppercase().as_str() {
                "EHLO" => {
                    let last = script.capabilities.len() - 1;
                    let lines: String = script
                        .capabilities
                        .iter()
                        .enumerate()
                        .map(|(i, capability)| {
                            let separator = if i == last { ' ' } else { '-' };
                            format!("250{separator}{capability}\r\n")
                        })
                        .collect();
                    (lines.into_bytes(), SmtpCommand::Ehlo(argument.to_string()))
                }
                "AUTH" if argument.eq_ignore_ascii_case("LOGIN") => {
                    writer.write_all(b"334 VXNlcm5hbWU6\r\n").await?;
                    let username = Self::read_command(&mut reader).await?.unwrap_or_default();
                    writer.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;
                    let secret = Self::read_command(&mut reader).await?.unwrap_or_default();

                    let decode = |value: &str| {
                        STANDARD
                            .decode(value)
                            .ok()
                            .and_then(|bytes| String::from_utf8(bytes).ok())
                            .unwrap_or_default()
                    };
                    let received = (decode(&username), decode(&secret));

                    let reply = match &script.credentials {
                        Some(expected) if *expected == received => {
                            Reply::new(235, "2.7.0 Authentication successful")
                        }
                        _ => Reply::new(535, "5.7.8 Authentication credentials invalid"),
                    };
                    (reply.to_bytes(), SmtpCommand::AuthLogin(received.0, received.1))
                }
                "MAIL" => (
                    script.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(argument.to_string()),
                ),
                "RCPT" => (
                    script.rcpt_to.to_bytes(),
                    SmtpCommand::RcptTo(argument.to_string()),
                ),
                "DATA" => (script.data.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(b"221 Bye\r\n").await?;
                    return Ok(());
                }
                _ => (
                    Reply::new(502, "Command not implemented").to_bytes(),
                    SmtpCommand::Other(line.clone()),
                ),
            };

            let data_accepted = command == SmtpCommand::Data && script.data.code == 354;
            commands.write().await.push(command);
            writer.write_all(&reply).await?;

            if data_accepted {
                let mut content = String::new();
                while let Some(line) = Self::read_command(&mut reader).await? {
                    if line == "." {
                        break;
                    }
                    content.push_str(&line);
                    content.push_str("\r\n");
                }
                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer.write_all(&script.data_end.to_bytes()).await?;
            }
        }

        Ok(())
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.greeting = Reply::new(code, message);
        self
    }

    /// Advertise `AUTH LOGIN` and accept only these credentials.
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.script.capabilities.push("AUTH LOGIN".to_string());
        self.script.credentials = Some((username.into(), secret.into()));
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.mail_from = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_rcpt_to_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.rcpt_to = Reply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.script.data_end = Reply::new(code, message);
        self
    }

    /// Accept connections but never send a greeting.
    #[must_use]
    pub const fn with_stalled_greeting(mut self) -> Self {
        self.script.stall_greeting = true;
        self
    }

    /// Bind to a free loopback port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let script = Arc::new(self.script);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let server_commands = Arc::clone(&commands);
        let server_shutdown = Arc::clone(&shutdown);

        tokio::spawn(async move {
            while !server_shutdown.load(Ordering::Relaxed) {
                // Wake up periodically to notice shutdown
                let Ok(Ok((stream, _))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                let script = Arc::clone(&script);
                let commands = Arc::clone(&server_commands);
                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle_client(stream, script, commands).await {
                        tracing::debug!("Mock server client error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            shutdown,
        })
    }
}
