//! The `courier` command line.

use std::{path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use courier_common::internal;
use courier_delivery::{DeliveryReport, Mailer, MailerConfig};
use courier_smtp::Attachment;

use crate::config;

/// Send mail through an ordered list of transports, queueing what none accepts
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Outbound mail delivery with transport fallback", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (overrides COURIER_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deliver one message
    Send(SendArgs),
    /// Validate the configuration and show the channel order
    CheckConfig,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Recipient address (repeat for several)
    #[arg(long, required = true)]
    pub to: Vec<String>,

    #[arg(long)]
    pub subject: String,

    #[command(flatten)]
    pub body: Body,

    /// Plain-text alternative (derived from the HTML when omitted)
    #[arg(long)]
    pub text: Option<String>,

    /// File to attach
    #[arg(long)]
    pub attach: Option<PathBuf>,

    /// MIME type of the attachment (guessed from its extension when omitted)
    #[arg(long, requires = "attach")]
    pub content_type: Option<String>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Body {
    /// HTML body
    #[arg(long)]
    pub html: Option<String>,

    /// File holding the HTML body
    #[arg(long)]
    pub html_file: Option<PathBuf>,
}

impl Body {
    async fn read(self) -> anyhow::Result<String> {
        match (self.html, self.html_file) {
            (Some(html), _) => Ok(html),
            (None, Some(path)) => tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read HTML body from {}", path.display())),
            (None, None) => anyhow::bail!("One of --html or --html-file is required"),
        }
    }
}

impl Cli {
    /// Run the selected command.
    ///
    /// # Errors
    /// If the configuration cannot be found, parsed or built, or the message
    /// cannot be composed. Delivery failures are reported through the exit
    /// code instead.
    pub async fn run(self) -> anyhow::Result<ExitCode> {
        let path = match self.config {
            Some(path) => path,
            None => config::find_config_file()?,
        };
        let config = config::load(&path)?;

        match self.command {
            Commands::CheckConfig => {
                check(&config)?;
                println!("{}: OK", path.display());
                Ok(ExitCode::SUCCESS)
            }
            Commands::Send(args) => {
                let mailer = config.build().await?;
                let report = send(&mailer, args).await?;
                println!("{}", summarise(&report));
                Ok(if report.is_accepted() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
        }
    }
}

fn check(config: &MailerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let mut order: Vec<String> = config.channels.iter().map(ToString::to_string).collect();
    order.push("queue".to_string());
    println!("channels: {}", order.join(" -> "));

    if let Some(path) = config.queue.path() {
        println!("queue directory: {}", path.display());
    }

    Ok(())
}

/// Compose the message described by `args` and hand it to `mailer`.
///
/// # Errors
/// If the body or attachment cannot be read, or the message is malformed.
pub async fn send(mailer: &Mailer, args: SendArgs) -> anyhow::Result<DeliveryReport> {
    let html = args.body.read().await?;

    let (first, rest) = args
        .to
        .split_first()
        .context("At least one --to is required")?;

    let mut builder = rest
        .iter()
        .fold(mailer.compose(first, &args.subject, &html), |builder, to| {
            builder.to(to)
        });

    if let Some(text) = args.text {
        builder = builder.text_body(text);
    }

    if let Some(path) = args.attach {
        let attachment = Attachment::from_path(&path, args.content_type.as_deref()).await?;
        builder = builder.attachment(attachment);
    }

    let message = builder.build()?;
    internal!(
        level = INFO,
        "Sending {} to {} recipient(s)",
        message.message_id(),
        message.recipients().len()
    );

    Ok(mailer.deliver(&message).await)
}

/// One line per attempt followed by the verdict.
#[must_use]
pub fn summarise(report: &DeliveryReport) -> String {
    let mut lines: Vec<String> = report
        .attempts
        .iter()
        .map(|attempt| match &attempt.outcome {
            Ok(receipt) => format!(
                "{}: accepted{}",
                attempt.channel,
                receipt
                    .provider_message_id
                    .as_ref()
                    .map(|id| format!(" ({id})"))
                    .unwrap_or_default()
            ),
            Err(failure) => format!("{}: {failure}", attempt.channel),
        })
        .collect();

    lines.push(match (&report.delivered_via, report.deferred) {
        (Some(_), true) => format!("{} queued for later delivery", report.message_id),
        (Some(channel), false) => format!("{} delivered via {channel}", report.message_id),
        (None, _) => format!("{} was not delivered", report.message_id),
    });

    lines.join("\n")
}
