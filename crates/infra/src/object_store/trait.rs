use std::sync::Arc;

use thiserror::Error;

use uploader_core::{DeleteOutcome, ObjectMetadata, ObjectRef, TagSet};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object store lock poisoned")]
    Poisoned,
}

/// Object storage boundary.
///
/// `delete` is idempotent: a missing object yields
/// [`DeleteOutcome::AlreadyGone`], never an error.
pub trait ObjectStore: Send + Sync {
    fn get_metadata(&self, object: &ObjectRef) -> Result<ObjectMetadata, ObjectStoreError>;

    fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, ObjectStoreError>;

    fn put_tags(&self, object: &ObjectRef, tags: TagSet) -> Result<(), ObjectStoreError>;

    /// Copy `source` to `destination`, replacing the destination's tags with `tags`.
    fn copy(
        &self,
        source: &ObjectRef,
        destination: &ObjectRef,
        tags: &TagSet,
    ) -> Result<(), ObjectStoreError>;

    fn delete(&self, object: &ObjectRef) -> Result<DeleteOutcome, ObjectStoreError>;
}

impl<S> ObjectStore for Arc<S>
where
    S: ObjectStore + ?Sized,
{
    fn get_metadata(&self, object: &ObjectRef) -> Result<ObjectMetadata, ObjectStoreError> {
        (**self).get_metadata(object)
    }

    fn get_tags(&self, object: &ObjectRef) -> Result<TagSet, ObjectStoreError> {
        (**self).get_tags(object)
    }

    fn put_tags(&self, object: &ObjectRef, tags: TagSet) -> Result<(), ObjectStoreError> {
        (**self).put_tags(object, tags)
    }

    fn copy(
        &self,
        source: &ObjectRef,
        destination: &ObjectRef,
        tags: &TagSet,
    ) -> Result<(), ObjectStoreError> {
        (**self).copy(source, destination, tags)
    }

    fn delete(&self, object: &ObjectRef) -> Result<DeleteOutcome, ObjectStoreError> {
        (**self).delete(object)
    }
}
