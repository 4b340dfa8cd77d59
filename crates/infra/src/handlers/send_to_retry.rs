//! `failed` (without `message`) → retry queue.

use std::sync::Arc;

use tracing::{error, info, warn};

use uploader_events::{ApiStatus, EventEnvelope, HandlerTarget};

use super::{EventHandler, HandlerError, HandlerReport};
use crate::queue::{QueueError, RetryQueue};

pub struct SendToRetryHandler {
    queue: Arc<dyn RetryQueue>,
}

impl SendToRetryHandler {
    pub fn new(queue: Arc<dyn RetryQueue>) -> Self {
        Self { queue }
    }
}

impl EventHandler for SendToRetryHandler {
    fn target(&self) -> HandlerTarget {
        HandlerTarget::SendToRetryQueue
    }

    fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerReport, HandlerError> {
        if envelope.status() != ApiStatus::Failed {
            return Err(HandlerError::UnexpectedStatus {
                handler: self.target(),
                status: envelope.status(),
            });
        }

        let body = envelope.to_json()?;
        match self.queue.send(&body) {
            Ok(message_id) => {
                info!(
                    event_id = %envelope.event_id(),
                    %message_id,
                    queue_url = self.queue.queue_url(),
                    object = %envelope.object(),
                    "queued for retry"
                );
                Ok(HandlerReport::MessageSent { message_id })
            }
            Err(QueueError::InvalidMessageContents(reason)) => {
                warn!(event_id = %envelope.event_id(), %reason, "queue refused message, dropping");
                Ok(HandlerReport::Dropped { reason })
            }
            Err(err) => {
                error!(event_id = %envelope.event_id(), error = %err, "enqueue failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::handlers::test_support::{clock, envelope, sources};
    use crate::queue::InMemoryRetryQueue;
    use std::time::Duration;
    use uploader_core::{DeleteOutcome, MessageId};

    #[derive(Debug)]
    struct Refusing(fn() -> QueueError);

    impl RetryQueue for Refusing {
        fn queue_url(&self) -> &str {
            "memory://refusing"
        }

        fn send(&self, _body: &str) -> Result<MessageId, QueueError> {
            Err((self.0)())
        }

        fn receive(&self, _max: usize, _wait: Duration) -> Result<Vec<crate::queue::ReceivedMessage>, QueueError> {
            Ok(Vec::new())
        }

        fn delete(&self, _url: &str, _receipt: &str) -> Result<DeleteOutcome, QueueError> {
            Ok(DeleteOutcome::AlreadyGone)
        }
    }

    #[test]
    fn failed_event_is_stored_unchanged() {
        let config = QueueConfig {
            name: "retry-queue".into(),
            visibility_timeout_secs: 60,
            retention_secs: 3600,
        };
        let queue = Arc::new(InMemoryRetryQueue::new(&config, clock()));
        let handler = SendToRetryHandler::new(queue.clone());
        let input = envelope(&sources().invoke_api, "foo-fail.json", ApiStatus::Failed, None);

        let report = handler.handle(&input).unwrap();
        assert!(matches!(report, HandlerReport::MessageSent { .. }));

        let stored = queue.receive(10, Duration::ZERO).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(EventEnvelope::from_json(&stored[0].body).unwrap(), input);
    }

    #[test]
    fn invalid_contents_are_dropped() {
        let handler = SendToRetryHandler::new(Arc::new(Refusing(|| {
            QueueError::InvalidMessageContents("too big".into())
        })));
        let input = envelope(&sources().invoke_api, "foo-fail.json", ApiStatus::Failed, None);
        assert_eq!(
            handler.handle(&input).unwrap(),
            HandlerReport::Dropped {
                reason: "too big".into()
            }
        );
    }

    #[test]
    fn other_queue_errors_propagate() {
        let handler = SendToRetryHandler::new(Arc::new(Refusing(|| QueueError::Backend("down".into()))));
        let input = envelope(&sources().invoke_api, "foo-fail.json", ApiStatus::Failed, None);
        assert!(matches!(handler.handle(&input), Err(HandlerError::Queue(QueueError::Backend(_)))));
    }

    #[test]
    fn only_failed_events_are_accepted() {
        let handler = SendToRetryHandler::new(Arc::new(Refusing(|| QueueError::Poisoned)));
        let input = envelope(&sources().invoke_api, "ok.txt", ApiStatus::Succeeded, None);
        assert!(matches!(handler.handle(&input), Err(HandlerError::UnexpectedStatus { .. })));
    }
}
