//! `ready_for_api` → external API → `succeeded` | `failed` | `rejected`.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use uploader_core::{Clock, ObjectRef, SourceId};
use uploader_events::{ApiStatus, EventBus, EventEnvelope, HandlerTarget};

use super::{EventHandler, HandlerError, HandlerReport, publish};
use crate::api::{ApiOutcome, ApiRequest, ExternalApi};
use crate::object_store::{ObjectStore, ObjectStoreError};

/// Tag appended to the outbound copy.
pub const ELAPSED_SECONDS_TAG: &str = "ElapsedSeconds";

/// Where successful uploads are copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub bucket: String,
    pub prefix: String,
}

pub struct InvokeApiHandler<B> {
    api: Arc<dyn ExternalApi>,
    store: Arc<dyn ObjectStore>,
    bus: B,
    clock: Arc<dyn Clock>,
    source: SourceId,
    copy: Option<CopyTarget>,
}

impl<B> InvokeApiHandler<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(
        api: Arc<dyn ExternalApi>,
        store: Arc<dyn ObjectStore>,
        bus: B,
        clock: Arc<dyn Clock>,
        source: SourceId,
        copy: Option<CopyTarget>,
    ) -> Self {
        Self {
            api,
            store,
            bus,
            clock,
            source,
            copy,
        }
    }

    /// Copy to the outbound bucket with the source tags plus `ElapsedSeconds`.
    fn copy_to_outbound(
        &self,
        target: &CopyTarget,
        object: &ObjectRef,
        elapsed: Duration,
    ) -> Result<(), ObjectStoreError> {
        let mut tags = self.store.get_tags(object)?;
        tags.set(ELAPSED_SECONDS_TAG, elapsed.num_seconds().max(0).to_string());
        let destination = object.relocated(&target.bucket, &target.prefix);
        self.store.copy(object, &destination, &tags)?;
        debug!(%object, %destination, "copied to outbound");
        Ok(())
    }
}

impl<B> EventHandler for InvokeApiHandler<B>
where
    B: EventBus<EventEnvelope>,
{
    fn target(&self) -> HandlerTarget {
        HandlerTarget::InvokeApi
    }

    fn handle(&self, envelope: &EventEnvelope) -> Result<HandlerReport, HandlerError> {
        if envelope.status() != ApiStatus::ReadyForApi {
            return Err(HandlerError::UnexpectedStatus {
                handler: self.target(),
                status: envelope.status(),
            });
        }

        let detail = envelope.detail();
        let object = &detail.object().object;
        let elapsed = self.clock.now() - detail.object().last_modified;

        let mut outcome = self.api.call(&ApiRequest { object, elapsed });
        if outcome == ApiOutcome::Succeeded {
            if let Some(target) = &self.copy {
                if let Err(err) = self.copy_to_outbound(target, object, elapsed) {
                    warn!(%object, error = %err, "outbound copy failed, reporting failure");
                    outcome = ApiOutcome::Failed;
                }
            }
        }

        let next = detail.clone().with_status(outcome.into());
        publish(&self.bus, EventEnvelope::new(self.source.clone(), next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{OutcomePolicy, SimulatedApi};
    use crate::handlers::test_support::{clock, envelope, sources, t0};
    use crate::object_store::InMemoryObjectStore;
    use uploader_core::{ManualClock, TagSet};
    use uploader_events::{InMemoryEventBus, QueueMessageRef, Subscription};

    type Bus = Arc<InMemoryEventBus<EventEnvelope>>;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<InMemoryObjectStore>,
        handler: InvokeApiHandler<Bus>,
        sub: Subscription<EventEnvelope>,
    }

    fn fixture(copy: Option<CopyTarget>) -> Fixture {
        let clock = clock();
        let store = Arc::new(InMemoryObjectStore::new(clock.clone()));
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let policy = OutcomePolicy::new("(?i)fail", "(?i)reject", Duration::seconds(120)).unwrap();
        let handler = InvokeApiHandler::new(
            Arc::new(SimulatedApi::new(policy)),
            store.clone(),
            bus,
            clock.clone(),
            sources().invoke_api,
            copy,
        );
        Fixture {
            clock,
            store,
            handler,
            sub,
        }
    }

    fn outbound() -> Option<CopyTarget> {
        Some(CopyTarget {
            bucket: "outbound".into(),
            prefix: "copied/".into(),
        })
    }

    fn put(store: &InMemoryObjectStore, key: &str, tags: TagSet) -> ObjectRef {
        let object = ObjectRef::new("inbound", key).unwrap();
        store.put(&object, "payload", tags).unwrap();
        object
    }

    #[test]
    fn transient_failure_publishes_failed_and_keeps_fields() {
        let f = fixture(outbound());
        put(&f.store, "foo-fail.json", TagSet::new());
        f.clock.set(t0() + Duration::seconds(10));

        let msg = QueueMessageRef {
            queue_url: "memory://retry-queue".into(),
            receipt_handle: "r".into(),
        };
        let input = envelope(&sources().drain, "foo-fail.json", ApiStatus::ReadyForApi, Some(msg));
        f.handler.handle(&input).unwrap();

        let out = f.sub.try_recv().unwrap();
        assert_eq!(out.status(), ApiStatus::Failed);
        assert_eq!(out.source(), &sources().invoke_api);
        assert_eq!(out.detail().object(), input.detail().object());
        assert!(f.store.list("outbound").unwrap().is_empty());
    }

    #[test]
    fn success_copies_with_source_tags_and_elapsed() {
        let f = fixture(outbound());
        put(&f.store, "ok.txt", TagSet::new().with("team", "ingest"));
        f.clock.set(t0() + Duration::seconds(3));

        let input = envelope(&sources().ingestion, "ok.txt", ApiStatus::ReadyForApi, None);
        let report = f.handler.handle(&input).unwrap();
        assert!(matches!(report, HandlerReport::Published { status: ApiStatus::Succeeded, .. }));

        let copy = ObjectRef::new("outbound", "copied/ok.txt").unwrap();
        let tags = f.store.get_tags(&copy).unwrap();
        assert_eq!(tags.get("team"), Some("ingest"));
        assert_eq!(tags.get(ELAPSED_SECONDS_TAG), Some("3"));
    }

    #[test]
    fn failed_copy_turns_success_into_failure() {
        let f = fixture(outbound());
        // Source object is missing, so the copy cannot read its tags.
        let input = envelope(&sources().ingestion, "ok.txt", ApiStatus::ReadyForApi, None);
        f.handler.handle(&input).unwrap();
        assert_eq!(f.sub.try_recv().unwrap().status(), ApiStatus::Failed);
    }

    #[test]
    fn copy_is_skipped_without_outbound_bucket() {
        let f = fixture(None);
        let input = envelope(&sources().ingestion, "ok.txt", ApiStatus::ReadyForApi, None);
        f.handler.handle(&input).unwrap();
        assert_eq!(f.sub.try_recv().unwrap().status(), ApiStatus::Succeeded);
    }

    #[test]
    fn rejected_names_are_rejected() {
        let f = fixture(outbound());
        put(&f.store, "bar-reject.csv", TagSet::new());
        let input = envelope(&sources().ingestion, "bar-reject.csv", ApiStatus::ReadyForApi, None);
        f.handler.handle(&input).unwrap();
        assert_eq!(f.sub.try_recv().unwrap().status(), ApiStatus::Rejected);
        assert!(f.store.list("outbound").unwrap().is_empty());
    }

    #[test]
    fn non_ready_input_is_an_error() {
        let f = fixture(outbound());
        let input = envelope(&sources().invoke_api, "ok.txt", ApiStatus::Failed, None);
        let err = f.handler.handle(&input).unwrap_err();
        assert!(matches!(err, HandlerError::UnexpectedStatus { status: ApiStatus::Failed, .. }));
        assert!(f.sub.try_recv().is_err());
    }
}
