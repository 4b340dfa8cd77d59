use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use uploader_core::{Clock, DeleteOutcome, ObjectMetadata, ObjectRef, TagSet};

use super::r#trait::{ObjectStore, ObjectStoreError};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Arc<[u8]>,
    metadata: ObjectMetadata,
    tags: TagSet,
}

/// In-memory object store for tests/dev.
///
/// Etags are the quoted hex SHA-256 of the body; `last_modified` comes from
/// the injected clock at write time.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    clock: Arc<dyn Clock>,
    objects: RwLock<BTreeMap<ObjectRef, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store `body` under `object`, replacing anything already there.
    pub fn put(
        &self,
        object: &ObjectRef,
        body: impl Into<Vec<u8>>,
        tags: TagSet,
    ) -> Result<ObjectMetadata, ObjectStoreError> {
        let body: Vec<u8> = body.into();
        let body: Arc<[u8]> = body.into();
        let metadata = ObjectMetadata {
            last_modified: self.clock.now(),
            etag: etag(&body),
        };

        let mut objects = self.objects.write().map_err(|_| ObjectStoreError::Poisoned)?;
        objects.insert(
            object.clone(),
            StoredObject {
                body,
                metadata: metadata.clone(),
                tags,
            },
        );
        tracing::debug!(%object, etag = %metadata.etag, "object stored");
        Ok(metadata)
    }

    pub fn get(&self, object: &ObjectRef) -> Result<Vec<u8>, ObjectStoreError> {
        self.with_object(object, |stored| stored.body.to_vec())
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(object))
            .unwrap_or(false)
    }

    /// Objects in `bucket`, in key order.
    pub fn list(&self, bucket: &str) -> Result<Vec<ObjectRef>, ObjectStoreError> {
        let objects = self.objects.read().map_err(|_| ObjectStoreError::Poisoned)?;
        Ok(objects
            .keys()
            .filter(|object| object.bucket() == bucket)
            .cloned()
            .collect())
    }

    fn with_object<T>(
        &self,
        object: &ObjectRef,
        f: impl FnOnce(&StoredObject) -> T,
    ) -> Result<T, ObjectStoreError> {
        let objects = self.objects.read().map_err(|_| ObjectStoreError::Poisoned)?;
        objects
            .get(object)
            .map(f)
            .ok_or_else(|| ObjectStoreError::NotFound(object.to_string()))
    }
}

fn etag(body: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(body))
}

impl ObjectStore for InMemoryObjectStore {
    fn get_metadata(&self, object: &ObjectRef) -> Result<ObjectMetadata, ObjectStoreError> {
        self.with_object(object, |stored| stored.metadata.clone())
    }

    fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, ObjectStoreError> {
        self.with_object(object, |stored| stored.tags.clone())
    }

    fn put_tags(&self, object: &ObjectRef, tags: TagSet) -> Result<(), ObjectStoreError> {
        let mut objects = self.objects.write().map_err(|_| ObjectStoreError::Poisoned)?;
        let stored = objects
            .get_mut(object)
            .ok_or_else(|| ObjectStoreError::NotFound(object.to_string()))?;
        stored.tags = tags;
        Ok(())
    }

    fn copy(
        &self,
        source: &ObjectRef,
        destination: &ObjectRef,
        tags: &TagSet,
    ) -> Result<(), ObjectStoreError> {
        let now = self.clock.now();
        let mut objects = self.objects.write().map_err(|_| ObjectStoreError::Poisoned)?;
        let original = objects
            .get(source)
            .ok_or_else(|| ObjectStoreError::NotFound(source.to_string()))?;

        let copy = StoredObject {
            body: Arc::clone(&original.body),
            metadata: ObjectMetadata {
                last_modified: now,
                etag: original.metadata.etag.clone(),
            },
            tags: tags.clone(),
        };
        objects.insert(destination.clone(), copy);
        Ok(())
    }

    fn delete(&self, object: &ObjectRef) -> Result<DeleteOutcome, ObjectStoreError> {
        let mut objects = self.objects.write().map_err(|_| ObjectStoreError::Poisoned)?;
        Ok(match objects.remove(object) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::AlreadyGone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uploader_core::ManualClock;

    fn store() -> (Arc<ManualClock>, InMemoryObjectStore) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        let store = InMemoryObjectStore::new(clock.clone());
        (clock, store)
    }

    fn obj(bucket: &str, key: &str) -> ObjectRef {
        ObjectRef::new(bucket, key).unwrap()
    }

    #[test]
    fn put_records_sha256_etag_and_clock_time() {
        let (clock, store) = store();
        let meta = store.put(&obj("inbound", "a.txt"), b"test".to_vec(), TagSet::new()).unwrap();

        assert_eq!(
            meta.etag,
            "\"9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08\""
        );
        assert_eq!(meta.last_modified, clock.now());
        assert_eq!(store.get_metadata(&obj("inbound", "a.txt")).unwrap(), meta);
    }

    #[test]
    fn missing_objects_are_not_found() {
        let (_, store) = store();
        let missing = obj("inbound", "nope");
        assert!(matches!(store.get_metadata(&missing), Err(ObjectStoreError::NotFound(_))));
        assert!(matches!(store.put_tags(&missing, TagSet::new()), Err(ObjectStoreError::NotFound(_))));
    }

    #[test]
    fn copy_keeps_body_and_replaces_tags() {
        let (clock, store) = store();
        let src = obj("inbound", "ok.txt");
        store.put(&src, "payload", TagSet::new().with("team", "ingest")).unwrap();

        clock.advance(Duration::seconds(5));
        let dst = obj("outbound", "copied/ok.txt");
        let tags = TagSet::new().with("ElapsedSeconds", "5");
        store.copy(&src, &dst, &tags).unwrap();

        assert_eq!(store.get(&dst).unwrap(), b"payload");
        assert_eq!(store.get_tags(&dst).unwrap(), tags);
        assert_eq!(store.get_tags(&src).unwrap().get("team"), Some("ingest"));
        assert_eq!(store.get_metadata(&dst).unwrap().last_modified, clock.now());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_, store) = store();
        let object = obj("inbound", "x");
        store.put(&object, "x", TagSet::new()).unwrap();

        assert_eq!(store.delete(&object).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(&object).unwrap(), DeleteOutcome::AlreadyGone);
        assert!(!store.contains(&object));
    }

    #[test]
    fn list_filters_by_bucket() {
        let (_, store) = store();
        store.put(&obj("inbound", "b"), "", TagSet::new()).unwrap();
        store.put(&obj("inbound", "a"), "", TagSet::new()).unwrap();
        store.put(&obj("outbound", "c"), "", TagSet::new()).unwrap();

        let listed = store.list("inbound").unwrap();
        assert_eq!(listed, vec![obj("inbound", "a"), obj("inbound", "b")]);
    }
}
