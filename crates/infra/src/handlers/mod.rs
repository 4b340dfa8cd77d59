//! Stateless pipeline handlers.
//!
//! Each handler gets its collaborators at construction and keeps nothing
//! between invocations. Handlers reached through routing implement
//! [`EventHandler`]; ingestion and the drain are driven from outside (a
//! storage notification and a schedule) and expose their own entry points.

pub mod delete_message;
pub mod delete_object;
pub mod drain_retries;
pub mod ingestion;
pub mod invoke_api;
pub mod send_to_retry;

pub use delete_message::DeleteMessageHandler;
pub use delete_object::DeleteObjectHandler;
pub use drain_retries::{DrainReport, DrainRetriesHandler, DrainSettings, DrainStop};
pub use ingestion::{IngestionHandler, ObjectCreated};
pub use invoke_api::{CopyTarget, InvokeApiHandler};
pub use send_to_retry::SendToRetryHandler;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use uploader_core::{DomainError, EventId, MessageId};
use uploader_events::{ApiStatus, EnvelopeError, EventBus, EventEnvelope, HandlerTarget};

use crate::object_store::ObjectStoreError;
use crate::queue::QueueError;

/// What a handler did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum HandlerReport {
    Published { status: ApiStatus, event_id: EventId },
    MessageSent { message_id: MessageId },
    Dropped { reason: String },
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{handler} cannot handle status {status}")]
    UnexpectedStatus {
        handler: HandlerTarget,
        status: ApiStatus,
    },

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("publish failed: {0}")]
    Publish(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A handler the router dispatches to.
pub trait EventHandler: Send + Sync {
    fn target(&self) -> HandlerTarget;

    fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerReport, HandlerError>;
}

/// Publish one envelope, logging it on the way out.
pub(crate) fn publish<B>(bus: &B, envelope: EventEnvelope) -> Result<HandlerReport, HandlerError>
where
    B: EventBus<EventEnvelope>,
{
    let event_id = envelope.event_id();
    let status = envelope.status();
    info!(
        %event_id,
        source = %envelope.source(),
        bucket = envelope.object().bucket(),
        key = envelope.object().key(),
        %status,
        "publishing status event"
    );

    bus.publish(envelope).map_err(|err| {
        error!(%event_id, error = %err, "publish failed");
        HandlerError::Publish(Box::new(err))
    })?;

    Ok(HandlerReport::Published { status, event_id })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use uploader_core::{ManualClock, ObjectMetadata, ObjectRef, SourceId};
    use uploader_events::{
        ApiStatus, EventBus, EventEnvelope, ObjectDetail, QueueMessageRef, RoutingSources, StatusDetail,
        Subscription,
    };

    /// Bus whose every publish fails.
    #[derive(Debug, Default)]
    pub struct ClosedBus;

    impl EventBus<EventEnvelope> for ClosedBus {
        type Error = std::io::Error;

        fn publish(&self, _message: EventEnvelope) -> Result<(), Self::Error> {
            Err(std::io::Error::other("bus closed"))
        }

        fn subscribe(&self) -> Subscription<EventEnvelope> {
            Subscription::new(std::sync::mpsc::channel().1)
        }
    }

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    pub fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(t0()))
    }

    pub fn sources() -> RoutingSources {
        RoutingSources {
            ingestion: SourceId::from_static("uploader.ingestion"),
            invoke_api: SourceId::from_static("uploader.invoke_api"),
            drain: SourceId::from_static("uploader.handle_retries"),
        }
    }

    pub fn envelope(
        source: &SourceId,
        key: &str,
        status: ApiStatus,
        message: Option<QueueMessageRef>,
    ) -> EventEnvelope {
        let mut detail = ObjectDetail::new(
            ObjectRef::new("inbound", key).unwrap(),
            ObjectMetadata {
                last_modified: t0(),
                etag: "\"etag\"".into(),
            },
            t0(),
        );
        detail.message = message;
        EventEnvelope::new(source.clone(), StatusDetail::new(status, detail))
    }
}
