//! `succeeded` → delete the source object.

use std::sync::Arc;

use tracing::{info, warn};

use uploader_events::{EventEnvelope, HandlerTarget};

use super::{EventHandler, HandlerError, HandlerReport};
use crate::object_store::ObjectStore;

pub struct DeleteObjectHandler {
    store: Arc<dyn ObjectStore>,
}

impl DeleteObjectHandler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl EventHandler for DeleteObjectHandler {
    fn target(&self) -> HandlerTarget {
        HandlerTarget::DeleteObject
    }

    fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerReport, HandlerError> {
        let object = envelope.object();
        match self.store.delete(object) {
            Ok(outcome) => {
                info!(event_id = %envelope.event_id(), %object, ?outcome, "source object deleted");
                Ok(HandlerReport::Succeeded)
            }
            Err(err) => {
                warn!(event_id = %envelope.event_id(), %object, error = %err, "source object delete failed");
                Ok(HandlerReport::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }
}
