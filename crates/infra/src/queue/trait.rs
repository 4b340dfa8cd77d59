use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use uploader_core::{DeleteOutcome, MessageId};

/// Largest body a queue accepts.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The payload can never be accepted; retrying is pointless.
    #[error("invalid message contents: {0}")]
    InvalidMessageContents(String),

    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    #[error("queue lock poisoned")]
    Poisoned,

    #[error("queue backend error: {0}")]
    Backend(String),
}

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: String,
    /// Token for deleting this delivery.
    pub receipt_handle: String,
}

/// Durable at-least-once queue.
///
/// A received message stays on the queue, invisible for the visibility
/// timeout, until it is deleted by receipt handle. Messages older than the
/// retention period are discarded.
pub trait RetryQueue: Send + Sync {
    fn queue_url(&self) -> &str;

    fn send(&self, body: &str) -> Result<MessageId, QueueError>;

    /// Up to `max_messages` visible messages, waiting at most `wait` for the first.
    fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError>;

    fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<DeleteOutcome, QueueError>;
}

impl<Q> RetryQueue for Arc<Q>
where
    Q: RetryQueue + ?Sized,
{
    fn queue_url(&self) -> &str {
        (**self).queue_url()
    }

    fn send(&self, body: &str) -> Result<MessageId, QueueError> {
        (**self).send(body)
    }

    fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
        (**self).receive(max_messages, wait)
    }

    fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<DeleteOutcome, QueueError> {
        (**self).delete(queue_url, receipt_handle)
    }
}

/// Checks shared by every queue implementation.
pub fn validate_body(body: &str) -> Result<(), QueueError> {
    if body.is_empty() {
        return Err(QueueError::InvalidMessageContents("body is empty".to_string()));
    }
    if body.len() > MAX_MESSAGE_BYTES {
        return Err(QueueError::InvalidMessageContents(format!(
            "body is {} bytes, limit is {MAX_MESSAGE_BYTES}",
            body.len()
        )));
    }
    if body.contains('\0') {
        return Err(QueueError::InvalidMessageContents(
            "body contains a NUL character".to_string(),
        ));
    }
    Ok(())
}
