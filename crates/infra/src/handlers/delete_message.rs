//! `succeeded` with `message` → delete the queue entry.

use std::sync::Arc;

use tracing::{info, warn};

use uploader_events::{EventEnvelope, HandlerTarget};

use super::{EventHandler, HandlerError, HandlerReport};
use crate::queue::RetryQueue;

pub struct DeleteMessageHandler {
    queue: Arc<dyn RetryQueue>,
}

impl DeleteMessageHandler {
    pub fn new(queue: Arc<dyn RetryQueue>) -> Self {
        Self { queue }
    }
}

impl EventHandler for DeleteMessageHandler {
    fn target(&self) -> HandlerTarget {
        HandlerTarget::DeleteMessage
    }

    /// Never returns `Err`: failures are reported, not escalated.
    fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerReport, HandlerError> {
        let Some(message) = envelope.detail().message() else {
            warn!(event_id = %envelope.event_id(), "no message found in event");
            return Ok(HandlerReport::Failed {
                reason: "no message found in event".to_string(),
            });
        };

        match self.queue.delete(&message.queue_url, &message.receipt_handle) {
            Ok(outcome) => {
                info!(
                    event_id = %envelope.event_id(),
                    queue_url = %message.queue_url,
                    ?outcome,
                    "queue message deleted"
                );
                Ok(HandlerReport::Succeeded)
            }
            Err(err) => {
                warn!(event_id = %envelope.event_id(), queue_url = %message.queue_url, error = %err, "queue message delete failed");
                Ok(HandlerReport::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }
}
