//! `uploader-core`: shared building blocks for the upload retry pipeline.
//!
//! This crate contains **pure** primitives (no collaborator I/O).

pub mod clock;
pub mod error;
pub mod id;
pub mod object;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{EventId, MessageId, SourceId};
pub use object::{DeleteOutcome, ObjectMetadata, ObjectRef, Tag, TagSet, parse_timestamp};
