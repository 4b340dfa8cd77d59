//! `uploader-events`: the status event, its routing table and the bus it travels on.

pub mod bus;
pub mod envelope;
pub mod in_memory_bus;
pub mod routing;
pub mod status;

pub use bus::{EventBus, Subscription};
pub use envelope::{DETAIL_TYPE, EnvelopeError, EventEnvelope, ObjectDetail, QueueMessageRef, StatusDetail};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use routing::{HandlerTarget, MessagePresence, RoutingRule, RoutingSources, RoutingTable};
pub use status::ApiStatus;
