//! Object-created notification → `ready_for_api` event.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use uploader_core::{Clock, DomainResult, ObjectRef, SourceId, parse_timestamp};
use uploader_events::{ApiStatus, EventBus, EventEnvelope, ObjectDetail, StatusDetail};

use super::{HandlerError, publish};
use crate::object_store::ObjectStore;

/// Object-created notification in the storage service's native shape:
///
/// ```json
/// { "time": "2024-05-01T12:00:00Z",
///   "detail": { "bucket": { "name": "inbound" }, "object": { "key": "foo.json" } } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub detail: CreatedDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDetail {
    pub bucket: BucketName,
    pub object: ObjectKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKey {
    pub key: String,
}

impl ObjectCreated {
    pub fn new(object: &ObjectRef, time: Option<String>) -> Self {
        Self {
            time,
            detail: CreatedDetail {
                bucket: BucketName {
                    name: object.bucket().to_string(),
                },
                object: ObjectKey {
                    key: object.key().to_string(),
                },
            },
        }
    }

    pub fn object(&self) -> DomainResult<ObjectRef> {
        ObjectRef::new(&self.detail.bucket.name, &self.detail.object.key)
    }
}

pub struct IngestionHandler<B> {
    store: Arc<dyn ObjectStore>,
    bus: B,
    clock: Arc<dyn Clock>,
    source: SourceId,
}

impl<B> IngestionHandler<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(store: Arc<dyn ObjectStore>, bus: B, clock: Arc<dyn Clock>, source: SourceId) -> Self {
        Self {
            store,
            bus,
            clock,
            source,
        }
    }

    /// Resolve metadata and publish exactly one `ready_for_api` envelope.
    ///
    /// Metadata and publish failures are returned; nothing is retried here.
    pub fn handle(&self, notification: &ObjectCreated) -> Result<EventEnvelope, HandlerError> {
        debug!(?notification, "object created notification");
        let object = notification.object()?;

        let metadata = self.store.get_metadata(&object).map_err(|err| {
            warn!(%object, error = %err, "metadata lookup failed");
            err
        })?;

        let received = match notification.time.as_deref().map(parse_timestamp) {
            Some(Ok(at)) => at,
            Some(Err(err)) => {
                debug!(error = %err, "unparseable notification time, using now");
                self.clock.now()
            }
            None => self.clock.now(),
        };

        let detail = StatusDetail::new(ApiStatus::ReadyForApi, ObjectDetail::new(object, metadata, received));
        let envelope = EventEnvelope::new(self.source.clone(), detail);
        publish(&self.bus, envelope.clone())?;
        Ok(envelope)
    }
}
