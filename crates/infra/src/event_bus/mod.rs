//! Event bus implementations and the runtime-selected bus used by the pipeline.
//!
//! The bus abstraction lives in `uploader-events`; this module adds the
//! Redis transport and [`PipelineBus`], which lets the process pick a
//! transport from configuration.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubEventBus};

use thiserror::Error;

use uploader_events::{EventBus, EventEnvelope, InMemoryBusError, InMemoryEventBus, Subscription};

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    InMemory(#[from] InMemoryBusError),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] RedisBusError),
}

/// The bus the pipeline runs on.
#[derive(Debug)]
pub enum PipelineBus {
    InMemory(InMemoryEventBus<EventEnvelope>),
    #[cfg(feature = "redis")]
    Redis(RedisPubSubEventBus),
}

impl PipelineBus {
    pub fn in_memory() -> Self {
        PipelineBus::InMemory(InMemoryEventBus::new())
    }

    pub fn transport(&self) -> &'static str {
        match self {
            PipelineBus::InMemory(_) => "in_memory",
            #[cfg(feature = "redis")]
            PipelineBus::Redis(_) => "redis_pubsub",
        }
    }
}

impl EventBus<EventEnvelope> for PipelineBus {
    type Error = BusError;

    fn publish(&self, message: EventEnvelope) -> Result<(), Self::Error> {
        match self {
            PipelineBus::InMemory(bus) => Ok(bus.publish(message)?),
            #[cfg(feature = "redis")]
            PipelineBus::Redis(bus) => Ok(bus.publish(message)?),
        }
    }

    fn subscribe(&self) -> Subscription<EventEnvelope> {
        match self {
            PipelineBus::InMemory(bus) => bus.subscribe(),
            #[cfg(feature = "redis")]
            PipelineBus::Redis(bus) => bus.subscribe(),
        }
    }
}
