//! Durable retry queue boundary and implementations.

pub mod in_memory;
pub mod r#trait;

#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::InMemoryRetryQueue;
pub use r#trait::{MAX_MESSAGE_BYTES, QueueError, ReceivedMessage, RetryQueue, validate_body};

#[cfg(feature = "redis")]
pub use redis_streams::{RedisQueueError, RedisStreamsRetryQueue};
