//! Canonical status event.
//!
//! Every event that crosses the bus or sits in the retry queue is an
//! [`EventEnvelope`]. All state a retry needs (object identity, timestamps,
//! queue coordinates) travels inside [`StatusDetail`], so no handler keeps
//! anything between invocations.
//!
//! Wire form of `detail`:
//!
//! ```json
//! {
//!   "bucket": "inbound",
//!   "key": "foo-fail.json",
//!   "last_modified": "2024-05-01T12:00:00Z",
//!   "etag": "\"9f86d0...\"",
//!   "received": "2024-05-01T12:00:01Z",
//!   "status": ["failed"],
//!   "message": { "queue_url": "...", "receipt_handle": "..." }
//! }
//! ```
//!
//! `status` is always a one-element array; `message` is omitted unless the
//! event came out of a queue drain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use uploader_core::{DomainError, EventId, ObjectMetadata, ObjectRef, SourceId};

use crate::status::ApiStatus;

/// Value of `kind` on every status event.
pub const DETAIL_TYPE: &str = "API Status";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("status must hold exactly one element, got {0}")]
    StatusArity(usize),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Coordinates of the queue entry an event was drained from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessageRef {
    pub queue_url: String,
    pub receipt_handle: String,
}

/// Fields shared by every status variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDetail {
    pub object: ObjectRef,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub received: DateTime<Utc>,
    pub message: Option<QueueMessageRef>,
}

impl ObjectDetail {
    pub fn new(object: ObjectRef, metadata: ObjectMetadata, received: DateTime<Utc>) -> Self {
        Self {
            object,
            last_modified: metadata.last_modified,
            etag: metadata.etag,
            received,
            message: None,
        }
    }
}

/// `detail` of a status event, one variant per status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireDetail", into = "WireDetail")]
pub enum StatusDetail {
    Ready(ObjectDetail),
    Succeeded(ObjectDetail),
    Failed(ObjectDetail),
    Rejected(ObjectDetail),
}

impl StatusDetail {
    pub fn new(status: ApiStatus, object: ObjectDetail) -> Self {
        match status {
            ApiStatus::ReadyForApi => Self::Ready(object),
            ApiStatus::Succeeded => Self::Succeeded(object),
            ApiStatus::Failed => Self::Failed(object),
            ApiStatus::Rejected => Self::Rejected(object),
        }
    }

    pub fn status(&self) -> ApiStatus {
        match self {
            Self::Ready(_) => ApiStatus::ReadyForApi,
            Self::Succeeded(_) => ApiStatus::Succeeded,
            Self::Failed(_) => ApiStatus::Failed,
            Self::Rejected(_) => ApiStatus::Rejected,
        }
    }

    pub fn object(&self) -> &ObjectDetail {
        match self {
            Self::Ready(d) | Self::Succeeded(d) | Self::Failed(d) | Self::Rejected(d) => d,
        }
    }

    pub fn into_object(self) -> ObjectDetail {
        match self {
            Self::Ready(d) | Self::Succeeded(d) | Self::Failed(d) | Self::Rejected(d) => d,
        }
    }

    pub fn message(&self) -> Option<&QueueMessageRef> {
        self.object().message.as_ref()
    }

    /// Same fields, new status.
    pub fn with_status(self, status: ApiStatus) -> Self {
        Self::new(status, self.into_object())
    }

    /// Re-arm a queued event for another API attempt, remembering where it came from.
    pub fn into_ready(self, message: QueueMessageRef) -> Self {
        let mut object = self.into_object();
        object.message = Some(message);
        Self::Ready(object)
    }
}

#[derive(Serialize, Deserialize)]
struct WireDetail {
    bucket: String,
    key: String,
    last_modified: DateTime<Utc>,
    etag: String,
    received: DateTime<Utc>,
    status: Vec<ApiStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<QueueMessageRef>,
}

impl TryFrom<WireDetail> for StatusDetail {
    type Error = EnvelopeError;

    fn try_from(wire: WireDetail) -> Result<Self, Self::Error> {
        let status = match wire.status.as_slice() {
            [status] => *status,
            other => return Err(EnvelopeError::StatusArity(other.len())),
        };
        let object = ObjectDetail {
            object: ObjectRef::new(wire.bucket, wire.key)?,
            last_modified: wire.last_modified,
            etag: wire.etag,
            received: wire.received,
            message: wire.message,
        };
        Ok(Self::new(status, object))
    }
}

impl From<StatusDetail> for WireDetail {
    fn from(detail: StatusDetail) -> Self {
        let status = detail.status();
        let d = detail.into_object();
        Self {
            bucket: d.object.bucket().to_string(),
            key: d.object.key().to_string(),
            last_modified: d.last_modified,
            etag: d.etag,
            received: d.received,
            status: vec![status],
            message: d.message,
        }
    }
}

/// A status event as published on the bus and stored in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    event_id: EventId,
    source_identity: SourceId,
    kind: String,
    detail: StatusDetail,
}

impl EventEnvelope {
    pub fn new(source: SourceId, detail: StatusDetail) -> Self {
        Self {
            event_id: EventId::new(),
            source_identity: source,
            kind: DETAIL_TYPE.to_string(),
            detail,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn source(&self) -> &SourceId {
        &self.source_identity
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn detail(&self) -> &StatusDetail {
        &self.detail
    }

    pub fn into_detail(self) -> StatusDetail {
        self.detail
    }

    pub fn status(&self) -> ApiStatus {
        self.detail.status()
    }

    pub fn object(&self) -> &ObjectRef {
        &self.detail.object().object
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(raw)?)
    }
}
