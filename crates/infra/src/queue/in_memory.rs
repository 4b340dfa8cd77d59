use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use uploader_core::{Clock, DeleteOutcome, MessageId};

use super::r#trait::{QueueError, ReceivedMessage, RetryQueue, validate_body};
use crate::config::QueueConfig;

#[derive(Debug)]
struct Entry {
    id: MessageId,
    body: String,
    sent_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    /// Every receipt handle issued for this message; any of them deletes it.
    receipts: Vec<String>,
}

/// In-process durable queue.
///
/// Visibility and retention are measured on the injected clock; long-poll
/// waits are measured in real time.
#[derive(Debug)]
pub struct InMemoryRetryQueue {
    url: String,
    visibility_timeout: chrono::Duration,
    retention: chrono::Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<VecDeque<Entry>>,
    arrived: Condvar,
}

impl InMemoryRetryQueue {
    pub fn new(config: &QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            url: format!("memory://{}", config.name),
            visibility_timeout: config.visibility_timeout(),
            retention: config.retention(),
            clock,
            entries: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    /// Messages currently held, visible or not.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_visible(&self, entries: &mut VecDeque<Entry>, max_messages: usize) -> Vec<ReceivedMessage> {
        let now = self.clock.now();
        let retention = self.retention;
        let before = entries.len();
        entries.retain(|e| e.sent_at.checked_add_signed(retention).is_none_or(|expiry| expiry > now));
        if entries.len() < before {
            debug!(queue_url = %self.url, expired = before - entries.len(), "purged expired messages");
        }

        let mut batch = Vec::new();
        for entry in entries.iter_mut().filter(|e| e.visible_at <= now) {
            if batch.len() >= max_messages {
                break;
            }
            let receipt = Uuid::now_v7().to_string();
            entry.visible_at = now
                .checked_add_signed(self.visibility_timeout)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            entry.receipts.push(receipt.clone());
            batch.push(ReceivedMessage {
                message_id: entry.id.clone(),
                body: entry.body.clone(),
                receipt_handle: receipt,
            });
        }
        batch
    }
}

impl RetryQueue for InMemoryRetryQueue {
    fn queue_url(&self) -> &str {
        &self.url
    }

    fn send(&self, body: &str) -> Result<MessageId, QueueError> {
        validate_body(body)?;

        let now = self.clock.now();
        let id = MessageId::new(Uuid::now_v7().to_string())
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let mut entries = self.entries.lock().map_err(|_| QueueError::Poisoned)?;
        entries.push_back(Entry {
            id: id.clone(),
            body: body.to_string(),
            sent_at: now,
            visible_at: now,
            receipts: Vec::new(),
        });
        drop(entries);

        self.arrived.notify_all();
        Ok(id)
    }

    fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + wait;
        let mut entries = self.entries.lock().map_err(|_| QueueError::Poisoned)?;
        loop {
            let batch = self.take_visible(&mut entries, max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            let (guard, _) = self
                .arrived
                .wait_timeout(entries, deadline - now)
                .map_err(|_| QueueError::Poisoned)?;
            entries = guard;
        }
    }

    fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<DeleteOutcome, QueueError> {
        if queue_url != self.url {
            return Err(QueueError::UnknownQueue(queue_url.to_string()));
        }

        let mut entries = self.entries.lock().map_err(|_| QueueError::Poisoned)?;
        let position = entries
            .iter()
            .position(|e| e.receipts.iter().any(|r| r == receipt_handle));
        Ok(match position.and_then(|idx| entries.remove(idx)) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyGone,
        })
    }
}
