//! The delivery orchestrator.
//!
//! Channels are tried strictly in order, one at a time. The first channel
//! that accepts the message ends the attempt. When every channel has failed,
//! or an overall deadline leaves no time for the next one, the message is
//! written to the queue. Only a failed queue write makes a send fail.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use courier_common::internal;
use courier_smtp::{Attachment, Mailbox, Message, MessageBuilder};

use crate::{
    DeliveryAttempt, DeliveryReport, Failure, Outcome,
    channel::{Channel, QueueChannel},
    outcome::{OutcomeLog, TracingOutcomeLog},
    sanitize::Sanitizer,
};

/// Sends mail through an ordered list of channels with a queue behind them.
#[derive(Debug)]
pub struct Mailer {
    sender: Mailbox,
    hostname: String,
    channels: Vec<Box<dyn Channel>>,
    queue: QueueChannel,
    outcome_log: Arc<dyn OutcomeLog>,
    sanitizer: Sanitizer,
    deadline: Option<Duration>,
}

impl Mailer {
    /// A mailer with no transports: every message goes to `queue` until
    /// channels are added.
    #[must_use]
    pub fn new(sender: Mailbox, queue: QueueChannel) -> Self {
        Self {
            sender,
            hostname: courier_smtp::local_hostname(),
            channels: Vec::new(),
            queue,
            outcome_log: Arc::new(TracingOutcomeLog::default()),
            sanitizer: Sanitizer::default(),
            deadline: None,
        }
    }

    /// Append a channel to the end of the order.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Channel + 'static) -> Self {
        self.channels.push(Box::new(channel));
        self
    }

    #[must_use]
    pub fn with_boxed_channel(mut self, channel: Box<dyn Channel>) -> Self {
        self.channels.push(channel);
        self
    }

    #[must_use]
    pub fn with_outcome_log(mut self, outcome_log: Arc<dyn OutcomeLog>) -> Self {
        self.outcome_log = outcome_log;
        self
    }

    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Bound the transport attempts of each send. The queue write is
    /// bounded separately and always runs.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Host name used in generated `Message-ID`s.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    #[must_use]
    pub const fn sender(&self) -> &Mailbox {
        &self.sender
    }

    /// Channel names in the order they are tried, the queue excluded.
    #[must_use]
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|channel| channel.name()).collect()
    }

    #[must_use]
    pub const fn queue(&self) -> &QueueChannel {
        &self.queue
    }

    /// A message builder pre-filled with this mailer's sender and host name.
    #[must_use]
    pub fn compose(&self, to: &str, subject: &str, html: &str) -> MessageBuilder {
        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(subject)
            .html_body(html)
            .hostname(&self.hostname)
    }

    /// Send an HTML message to one recipient.
    ///
    /// Returns `true` when a transport or the queue accepted the message.
    pub async fn send(&self, to: &str, subject: &str, html: &str) -> bool {
        self.build_and_deliver(self.compose(to, subject, html)).await
    }

    /// [`Mailer::send`] with one attachment.
    pub async fn send_with_attachment(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachment: Attachment,
    ) -> bool {
        self.build_and_deliver(self.compose(to, subject, html).attachment(attachment))
            .await
    }

    async fn build_and_deliver(&self, builder: MessageBuilder) -> bool {
        match builder.build() {
            Ok(message) => self.deliver(&message).await.is_accepted(),
            Err(e) => {
                internal!(level = ERROR, "Refusing to send message: {e}");
                false
            }
        }
    }

    /// Run `message` through the channels and, if none accepts it, the queue.
    pub async fn deliver(&self, message: &Message) -> DeliveryReport {
        let started = std::time::Instant::now();
        let mut attempts = Vec::with_capacity(self.channels.len() + 1);

        for channel in &self.channels {
            let remaining = match self.deadline {
                Some(deadline) => match deadline.checked_sub(started.elapsed()) {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => {
                        internal!(
                            level = WARN,
                            "Deadline reached for {}, skipping to the queue",
                            message.message_id()
                        );
                        break;
                    }
                },
                None => None,
            };

            let attempt = self
                .observe(
                    message,
                    channel.name(),
                    attempts.len() + 1,
                    bounded(remaining, channel.attempt(message)),
                )
                .await;

            let accepted = attempt.succeeded();
            attempts.push(attempt);

            if accepted {
                return DeliveryReport {
                    message_id: message.message_id().to_string(),
                    delivered_via: Some(channel.name().to_string()),
                    attempts,
                    deferred: false,
                    error: None,
                };
            }
        }

        self.defer(message, attempts).await
    }

    async fn defer(&self, message: &Message, mut attempts: Vec<DeliveryAttempt>) -> DeliveryReport {
        let transport_attempts = attempts.len();
        let attempt = self
            .observe(
                message,
                self.queue.name(),
                transport_attempts + 1,
                self.queue.persist(message, &attempts),
            )
            .await;

        let error = attempt.failure().cloned();
        attempts.push(attempt);

        let delivered_via = match &error {
            None => {
                self.outcome_log
                    .deferred(message.message_id(), transport_attempts)
                    .await;
                Some(self.queue.name().to_string())
            }
            Some(failure) => {
                internal!(
                    level = ERROR,
                    "{} could be neither delivered nor queued: {failure}",
                    message.message_id()
                );
                None
            }
        };

        DeliveryReport {
            message_id: message.message_id().to_string(),
            deferred: delivered_via.is_some(),
            delivered_via,
            attempts,
            error,
        }
    }

    /// Time one attempt, scrub its failure and hand it to the outcome log.
    async fn observe(
        &self,
        message: &Message,
        channel: &str,
        attempt_number: usize,
        attempt: impl Future<Output = Outcome>,
    ) -> DeliveryAttempt {
        self.outcome_log
            .attempting(message, channel, attempt_number)
            .await;

        let timestamp = Utc::now();
        let started = std::time::Instant::now();
        let outcome = attempt
            .await
            .map_err(|failure| failure.sanitized(&self.sanitizer));

        let attempt = DeliveryAttempt {
            channel: channel.to_string(),
            outcome,
            timestamp,
            duration: started.elapsed(),
        };

        match &attempt.outcome {
            Ok(_) => internal!(
                "{channel} accepted {} in {:?}",
                message.message_id(),
                attempt.duration
            ),
            Err(failure) => internal!(
                level = WARN,
                "{channel} failed for {}: {failure}",
                message.message_id()
            ),
        }

        self.outcome_log
            .record(message.message_id(), attempt_number, &attempt)
            .await;

        attempt
    }
}

/// Await `attempt`, giving up once `limit` has passed. Dropping the attempt
/// closes whatever socket or process it held.
async fn bounded(limit: Option<Duration>, attempt: impl Future<Output = Outcome>) -> Outcome {
    match limit {
        Some(limit) => tokio::time::timeout(limit, attempt).await.unwrap_or_else(|_| {
            Err(Failure::timeout(format!(
                "overall deadline reached after {limit:?}"
            )))
        }),
        None => attempt.await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use courier_queue::{MemoryQueueStore, QueueStore};

    use super::*;
    use crate::{FailureKind, Receipt, outcome::MemoryOutcomeLog};

    #[derive(Debug, Clone)]
    struct Scripted {
        name: &'static str,
        outcome: Outcome,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, outcome: Outcome) -> Self {
            Self {
                name,
                outcome,
                delay: None,
                calls: Arc::default(),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Channel for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn attempt(&self, _message: &Message) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcome.clone()
        }
    }

    fn mailer(store: Arc<MemoryQueueStore>) -> Mailer {
        Mailer::new(
            Mailbox::new("noreply@example.com").with_name("Example"),
            QueueChannel::new(store, Duration::from_secs(1)),
        )
        .with_hostname("test.local")
    }

    fn refused() -> Outcome {
        Err(Failure::connect("connection refused"))
    }

    #[tokio::test]
    async fn test_first_success_ends_the_attempt() {
        let store = Arc::new(MemoryQueueStore::new());
        let first = Scripted::new("smtp", Ok(Receipt::with_id("250 ok")));
        let second = Scripted::new("brevo", Ok(Receipt::default()));
        let mailer = mailer(store.clone())
            .with_channel(first.clone())
            .with_channel(second.clone());

        let message = mailer
            .compose("user@example.com", "Hi", "<p>Hi</p>")
            .build()
            .unwrap();
        let report = mailer.deliver(&message).await;

        assert_eq!(report.delivered_via.as_deref(), Some("smtp"));
        assert_eq!(report.attempts.len(), 1);
        assert!(!report.deferred);
        assert_eq!(second.calls(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_falls_through_in_order() {
        let store = Arc::new(MemoryQueueStore::new());
        let log = Arc::new(MemoryOutcomeLog::new());
        let mailer = mailer(store)
            .with_channel(Scripted::new("smtp", refused()))
            .with_channel(Scripted::new(
                "brevo",
                Err(Failure::adapter("HTTP 400", false)),
            ))
            .with_channel(Scripted::new("sendgrid", Ok(Receipt::default())))
            .with_outcome_log(log.clone());

        assert!(mailer.send("user@example.com", "Hi", "<p>Hi</p>").await);

        let channels: Vec<_> = log
            .entries()
            .into_iter()
            .map(|entry| (entry.attempt_number, entry.attempt.channel))
            .collect();
        assert_eq!(
            channels,
            vec![
                (1, "smtp".to_string()),
                (2, "brevo".to_string()),
                (3, "sendgrid".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_all_failures_defer_to_queue() {
        let store = Arc::new(MemoryQueueStore::new());
        let mailer = mailer(store.clone())
            .with_channel(Scripted::new("smtp", refused()))
            .with_channel(Scripted::new("brevo", Err(Failure::adapter("HTTP 503", true))));

        let message = mailer
            .compose("user@example.com", "Later", "<p>Later</p>")
            .build()
            .unwrap();
        let report = mailer.deliver(&message).await;

        assert!(report.is_accepted());
        assert!(report.deferred);
        assert_eq!(report.delivered_via.as_deref(), Some("queue"));
        assert_eq!(report.attempts.len(), 3);
        assert!(report.error.is_none());

        let id = store.list().await.unwrap().remove(0);
        let record = store.read(&id).await.unwrap();
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error.as_deref(), Some("adapter failure: HTTP 503"));
    }

    #[tokio::test]
    async fn test_queue_failure_fails_the_send() {
        let mailer = mailer(Arc::new(MemoryQueueStore::with_capacity(0)))
            .with_channel(Scripted::new("smtp", refused()));

        let message = mailer
            .compose("user@example.com", "Lost", "<p>Lost</p>")
            .build()
            .unwrap();
        let report = mailer.deliver(&message).await;

        assert!(!report.is_accepted());
        assert!(!report.deferred);
        assert_eq!(
            report.error.as_ref().map(|failure| failure.kind),
            Some(FailureKind::Persistence)
        );
        assert_eq!(report.attempts.len(), 2);

        assert!(!mailer.send("user@example.com", "Lost", "<p>Lost</p>").await);
    }

    #[tokio::test]
    async fn test_no_channels_goes_straight_to_queue() {
        let store = Arc::new(MemoryQueueStore::new());
        let mailer = mailer(store.clone());

        assert!(mailer.send("user@example.com", "Queued", "<p>Q</p>").await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_cuts_slow_channel_and_skips_the_rest() {
        let store = Arc::new(MemoryQueueStore::new());
        let slow = Scripted::new("smtp", Ok(Receipt::default())).slow(Duration::from_secs(30));
        let never = Scripted::new("brevo", Ok(Receipt::default()));
        let mailer = mailer(store.clone())
            .with_channel(slow)
            .with_channel(never.clone())
            .with_deadline(Duration::from_millis(100));

        let message = mailer
            .compose("user@example.com", "Hurry", "<p>Hurry</p>")
            .build()
            .unwrap();
        let report = mailer.deliver(&message).await;

        assert_eq!(never.calls(), 0);
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(
            report.attempts[0].failure().map(|failure| failure.kind),
            Some(FailureKind::Timeout)
        );
        assert!(report.deferred);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_reasons_are_sanitized() {
        let log = Arc::new(MemoryOutcomeLog::new());
        let mailer = mailer(Arc::new(MemoryQueueStore::new()))
            .with_channel(Scripted::new(
                "brevo",
                Err(Failure::adapter("HTTP 401: key xkeysib-abc is invalid", false)),
            ))
            .with_sanitizer(Sanitizer::new().with_secret("xkeysib-abc"))
            .with_outcome_log(log.clone());

        assert!(mailer.send("user@example.com", "Hi", "<p>Hi</p>").await);

        let entries = log.entries();
        let reason = &entries[0].attempt.failure().unwrap().reason;
        assert_eq!(reason, "HTTP 401: key [REDACTED] is invalid");
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_refused() {
        let store = Arc::new(MemoryQueueStore::new());
        let channel = Scripted::new("smtp", Ok(Receipt::default()));
        let mailer = mailer(store.clone()).with_channel(channel.clone());

        assert!(!mailer.send("not-an-address", "Hi", "<p>Hi</p>").await);
        assert!(
            !mailer
                .send("user@example.com\r\nBcc: x@evil.com", "Hi", "<p>Hi</p>")
                .await
        );
        assert_eq!(channel.calls(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_compose_uses_sender_and_hostname() {
        let mailer = mailer(Arc::new(MemoryQueueStore::new()));
        let message = mailer
            .compose("user@example.com", "Hi", "<p>Hi</p>")
            .build()
            .unwrap();

        assert_eq!(message.from().address, "noreply@example.com");
        assert!(message.message_id().ends_with("@test.local>"));
    }
}
