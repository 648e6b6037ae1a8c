use std::{sync::Arc, time::Duration};

use courier_common::internal;
use courier_queue::{QueueRecord, QueueStore, QueuedAttachment};
use courier_smtp::Message;

use crate::{DeliveryAttempt, Failure, Outcome, Receipt};

/// The last-resort channel: persists a message that no transport accepted.
///
/// Not part of the ordered channel list. The orchestrator calls it once
/// every transport has failed or the deadline has run out.
#[derive(Debug, Clone)]
pub struct QueueChannel {
    store: Arc<dyn QueueStore>,
    timeout: Duration,
}

impl QueueChannel {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        "queue"
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Write `message` to the store along with the attempts that preceded it.
    pub async fn persist(&self, message: &Message, attempts: &[DeliveryAttempt]) -> Outcome {
        let record = record_for(message, attempts);

        let id = tokio::time::timeout(self.timeout, self.store.enqueue(&record))
            .await
            .map_err(|_| {
                Failure::persistence(format!("queue write timed out after {:?}", self.timeout))
            })??;

        internal!(
            "Deferred {} to the queue as {id} after {} attempts",
            message.message_id(),
            attempts.len()
        );

        Ok(Receipt::with_id(id.to_string()))
    }
}

fn record_for(message: &Message, attempts: &[DeliveryAttempt]) -> QueueRecord {
    let last_error = attempts
        .iter()
        .rev()
        .find_map(DeliveryAttempt::failure)
        .map(ToString::to_string);
    let count = u32::try_from(attempts.len()).unwrap_or(u32::MAX);

    let record = QueueRecord::new(
        message.from().address.clone(),
        message.recipients().to_vec(),
        message.subject(),
        message.html_body(),
    )
    .with_text_body(message.text_body())
    .with_attempts(count, last_error);

    match message.attachment() {
        Some(attachment) => record.with_attachment(QueuedAttachment {
            filename: attachment.filename.clone(),
            content_type: attachment.content_type.clone(),
            data: attachment.data.clone(),
        }),
        None => record,
    }
}
