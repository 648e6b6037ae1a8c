use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use courier_common::internal;
use courier_smtp::Message;
use serde::Deserialize;
use tokio::{io::AsyncWriteExt, process::Command};

use super::Channel;
use crate::{Failure, Outcome, Receipt};

/// `EX_TEMPFAIL` from `sysexits.h`.
const EX_TEMPFAIL: i32 = 75;

const MAX_STDERR: usize = 200;

/// Local submission program settings.
///
/// ```ron
/// sendmail: (
///     program: "/usr/sbin/sendmail",
///     args: ["-t", "-i"],
/// ),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SendmailConfig {
    #[serde(default = "default_program")]
    pub program: PathBuf,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_program() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

fn default_args() -> Vec<String> {
    vec!["-t".to_string(), "-i".to_string()]
}

const fn default_timeout_ms() -> u64 {
    60_000
}

impl Default for SendmailConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Pipes the fully rendered message into a local submission program.
#[derive(Debug, Clone)]
pub struct SendmailChannel {
    config: SendmailConfig,
}

impl SendmailChannel {
    #[must_use]
    pub const fn new(config: SendmailConfig) -> Self {
        Self { config }
    }

    async fn submit(&self, message: &Message) -> Outcome {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Failure::adapter(
                    format!("failed to start {}: {e}", self.config.program.display()),
                    true,
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits early closes the pipe; its exit status
            // says more than the write error.
            if let Err(e) = stdin.write_all(message.formatted().as_bytes()).await {
                internal!(level = DEBUG, "sendmail stdin closed early: {e}");
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            Failure::adapter(format!("failed waiting for sendmail: {e}"), true)
        })?;

        if output.status.success() {
            return Ok(Receipt::default());
        }

        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .chars()
            .take(MAX_STDERR)
            .collect();
        let stderr = stderr.trim();

        Err(match output.status.code() {
            Some(EX_TEMPFAIL) => Failure::adapter(
                format!("sendmail deferred (exit {EX_TEMPFAIL}): {stderr}"),
                true,
            ),
            Some(code) => Failure::adapter(format!("sendmail exited with {code}: {stderr}"), false),
            None => Failure::adapter("sendmail was terminated by a signal", true),
        })
    }
}

#[async_trait]
impl Channel for SendmailChannel {
    fn name(&self) -> &str {
        "sendmail"
    }

    async fn attempt(&self, message: &Message) -> Outcome {
        let limit = Duration::from_millis(self.config.timeout_ms);

        // Dropping the submit future drops the child, which kills it.
        tokio::time::timeout(limit, self.submit(message))
            .await
            .unwrap_or_else(|_| Err(Failure::timeout(format!("sendmail timed out after {limit:?}"))))
    }
}
