//! Infrastructure layer: collaborators, handlers, routing, workers and the
//! assembled pipeline.

pub mod api;
pub mod config;
pub mod event_bus;
pub mod handlers;
pub mod object_store;
pub mod pipeline;
pub mod queue;
pub mod router;
pub mod workers;
