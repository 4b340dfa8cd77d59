//! Scheduled drain: queued failures → `ready_for_api` events carrying `message`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use uploader_core::{Clock, SourceId};
use uploader_events::{EventBus, EventEnvelope, QueueMessageRef};

use super::publish;
use crate::config::{DrainConfig, MAX_DRAIN_BATCH};
use crate::queue::{ReceivedMessage, RetryQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSettings {
    pub batch_size: usize,
    /// Long-poll wait per receive, before clamping to the remaining budget.
    pub wait: Duration,
    /// Wall-clock budget of one drain cycle.
    pub budget: Duration,
}

impl From<&DrainConfig> for DrainSettings {
    fn from(config: &DrainConfig) -> Self {
        Self {
            batch_size: config.batch_size.clamp(1, MAX_DRAIN_BATCH),
            wait: config.wait(),
            budget: config.budget(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStop {
    EmptyBatch,
    BudgetExhausted,
    ReceiveError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub republished: usize,
    /// Messages left on the queue because they could not be decoded or published.
    pub skipped: usize,
    pub polls: usize,
    pub stop: DrainStop,
}

pub struct DrainRetriesHandler<B> {
    queue: Arc<dyn RetryQueue>,
    bus: B,
    clock: Arc<dyn Clock>,
    source: SourceId,
    settings: DrainSettings,
}

impl<B> DrainRetriesHandler<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(
        queue: Arc<dyn RetryQueue>,
        bus: B,
        clock: Arc<dyn Clock>,
        source: SourceId,
        settings: DrainSettings,
    ) -> Self {
        Self {
            queue,
            bus,
            clock,
            source,
            settings,
        }
    }

    pub fn settings(&self) -> DrainSettings {
        self.settings
    }

    /// One drain cycle: poll until an empty batch, the budget runs out, or a
    /// receive fails. Messages are republished, never deleted.
    pub fn run(&self) -> DrainReport {
        let budget = chrono::Duration::from_std(self.settings.budget).unwrap_or(chrono::Duration::MAX);
        let deadline = self
            .clock
            .now()
            .checked_add_signed(budget)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut report = DrainReport {
            republished: 0,
            skipped: 0,
            polls: 0,
            stop: DrainStop::BudgetExhausted,
        };

        loop {
            let remaining = match (deadline - self.clock.now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    report.stop = DrainStop::BudgetExhausted;
                    break;
                }
            };

            report.polls += 1;
            let wait = self.settings.wait.min(remaining);
            let batch = match self.queue.receive(self.settings.batch_size, wait) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(queue_url = self.queue.queue_url(), error = %err, "receive failed, ending drain");
                    report.stop = DrainStop::ReceiveError;
                    break;
                }
            };

            if batch.is_empty() {
                report.stop = DrainStop::EmptyBatch;
                break;
            }

            for message in batch {
                if self.republish(message) {
                    report.republished += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        info!(
            republished = report.republished,
            skipped = report.skipped,
            polls = report.polls,
            stop = ?report.stop,
            "drain cycle finished"
        );
        report
    }

    fn republish(&self, message: ReceivedMessage) -> bool {
        let stored = match EventEnvelope::from_json(&message.body) {
            Ok(env) => env,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "undecodable queue message, skipping");
                return false;
            }
        };
        debug!(message_id = %message.message_id, event_id = %stored.event_id(), "draining queued event");

        let detail = stored.into_detail().into_ready(QueueMessageRef {
            queue_url: self.queue.queue_url().to_string(),
            receipt_handle: message.receipt_handle,
        });

        match publish(&self.bus, EventEnvelope::new(self.source.clone(), detail)) {
            Ok(_) => true,
            Err(err) => {
                warn!(message_id = %message.message_id, error = %err, "republish failed, message stays queued");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::handlers::test_support::{ClosedBus, clock, envelope, sources};
    use crate::queue::{InMemoryRetryQueue, QueueError};
    use std::sync::Mutex;
    use uploader_core::{DeleteOutcome, ManualClock, MessageId};
    use uploader_events::{ApiStatus, InMemoryEventBus};

    type Bus = Arc<InMemoryEventBus<EventEnvelope>>;

    fn settings() -> DrainSettings {
        DrainSettings {
            batch_size: 10,
            wait: Duration::ZERO,
            budget: Duration::from_secs(60),
        }
    }

    fn memory_queue(clock: Arc<ManualClock>) -> Arc<InMemoryRetryQueue> {
        let config = QueueConfig {
            name: "retry-queue".into(),
            visibility_timeout_secs: 60,
            retention_secs: 3600,
        };
        Arc::new(InMemoryRetryQueue::new(&config, clock))
    }

    fn drain(queue: Arc<dyn RetryQueue>, clock: Arc<ManualClock>, bus: Bus, settings: DrainSettings) -> DrainRetriesHandler<Bus> {
        DrainRetriesHandler::new(queue, bus, clock, sources().drain, settings)
    }

    #[test]
    fn republishes_each_message_with_its_receipt() {
        let clock = clock();
        let queue = memory_queue(clock.clone());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();

        for key in ["a-fail.json", "b-fail.json", "c-fail.json"] {
            let env = envelope(&sources().invoke_api, key, ApiStatus::Failed, None);
            queue.send(&env.to_json().unwrap()).unwrap();
        }

        let report = drain(queue.clone(), clock, bus, settings()).run();
        assert_eq!(report.republished, 3);
        assert_eq!(report.polls, 2);
        assert_eq!(report.stop, DrainStop::EmptyBatch);

        for _ in 0..3 {
            let env = sub.try_recv().unwrap();
            assert_eq!(env.status(), ApiStatus::ReadyForApi);
            assert_eq!(env.source(), &sources().drain);
            let message = env.detail().message().unwrap();
            assert_eq!(message.queue_url, "memory://retry-queue");
            assert!(!message.receipt_handle.is_empty());
        }
        // Nothing is deleted by the drain itself.
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn empty_queue_stops_after_one_poll() {
        let clock = clock();
        let report = drain(memory_queue(clock.clone()), clock, Arc::new(InMemoryEventBus::new()), settings()).run();
        assert_eq!(
            report,
            DrainReport {
                republished: 0,
                skipped: 0,
                polls: 1,
                stop: DrainStop::EmptyBatch
            }
        );
    }

    #[test]
    fn undecodable_messages_are_skipped_and_left_queued() {
        let clock = clock();
        let queue = memory_queue(clock.clone());
        queue.send("not json").unwrap();

        let report = drain(queue.clone(), clock, Arc::new(InMemoryEventBus::new()), settings()).run();
        assert_eq!(report.republished, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(queue.len(), 1);
    }

    /// Queue that always has a message and advances the clock on each receive.
    #[derive(Debug)]
    struct Endless {
        clock: Arc<ManualClock>,
        body: String,
        waits: Mutex<Vec<Duration>>,
    }

    impl RetryQueue for Endless {
        fn queue_url(&self) -> &str {
            "memory://endless"
        }

        fn send(&self, _body: &str) -> Result<MessageId, QueueError> {
            Err(QueueError::Backend("read only".into()))
        }

        fn receive(&self, _max: usize, wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
            self.waits.lock().unwrap().push(wait);
            self.clock.advance(chrono::Duration::seconds(25));
            Ok(vec![ReceivedMessage {
                message_id: MessageId::new("m").unwrap(),
                body: self.body.clone(),
                receipt_handle: "r".into(),
            }])
        }

        fn delete(&self, _url: &str, _receipt: &str) -> Result<DeleteOutcome, QueueError> {
            Ok(DeleteOutcome::AlreadyGone)
        }
    }

    #[test]
    fn budget_bounds_the_cycle_and_clamps_the_wait() {
        let clock = clock();
        let body = envelope(&sources().invoke_api, "x-fail.json", ApiStatus::Failed, None)
            .to_json()
            .unwrap();
        let queue = Arc::new(Endless {
            clock: clock.clone(),
            body,
            waits: Mutex::new(Vec::new()),
        });
        let settings = DrainSettings {
            batch_size: 1,
            wait: Duration::from_secs(15),
            budget: Duration::from_secs(60),
        };

        let report = drain(queue.clone(), clock, Arc::new(InMemoryEventBus::new()), settings).run();
        assert_eq!(report.stop, DrainStop::BudgetExhausted);
        assert_eq!(report.polls, 3);
        assert_eq!(report.republished, 3);
        assert_eq!(
            *queue.waits.lock().unwrap(),
            vec![Duration::from_secs(15), Duration::from_secs(15), Duration::from_secs(10)]
        );
    }

    #[test]
    fn failed_republish_is_skipped_and_left_queued() {
        let clock = clock();
        let queue = memory_queue(clock.clone());
        let env = envelope(&sources().invoke_api, "x-fail.json", ApiStatus::Failed, None);
        queue.send(&env.to_json().unwrap()).unwrap();

        let handler = DrainRetriesHandler::new(queue.clone(), ClosedBus, clock.clone(), sources().drain, settings());
        let report = handler.run();
        assert_eq!(report.republished, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.stop, DrainStop::EmptyBatch);
        assert_eq!(queue.len(), 1);

        // Hidden only until the visibility timeout, then drained again.
        clock.advance(chrono::Duration::seconds(60));
        let report = drain(queue.clone(), clock, Arc::new(InMemoryEventBus::new()), settings()).run();
        assert_eq!(report.republished, 1);
    }

    #[derive(Debug)]
    struct Broken;

    impl RetryQueue for Broken {
        fn queue_url(&self) -> &str {
            "memory://broken"
        }

        fn send(&self, _body: &str) -> Result<MessageId, QueueError> {
            Err(QueueError::Backend("down".into()))
        }

        fn receive(&self, _max: usize, _wait: Duration) -> Result<Vec<ReceivedMessage>, QueueError> {
            Err(QueueError::Backend("down".into()))
        }

        fn delete(&self, _url: &str, _receipt: &str) -> Result<DeleteOutcome, QueueError> {
            Err(QueueError::Backend("down".into()))
        }
    }

    #[test]
    fn receive_errors_end_the_cycle_without_escalating() {
        let clock = clock();
        let report = drain(Arc::new(Broken), clock, Arc::new(InMemoryEventBus::new()), settings()).run();
        assert_eq!(report.stop, DrainStop::ReceiveError);
        assert_eq!(report.polls, 1);
    }
}
