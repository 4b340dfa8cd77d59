//! Object storage boundary and the in-process store.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryObjectStore;
pub use r#trait::{ObjectStore, ObjectStoreError};
