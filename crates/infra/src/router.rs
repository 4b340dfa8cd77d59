//! Dispatch of status events to handlers according to a [`RoutingTable`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use uploader_events::{EventEnvelope, HandlerTarget, RoutingTable};

use crate::handlers::{EventHandler, HandlerError, HandlerReport};

/// Result of handing one envelope to one handler.
#[derive(Debug)]
pub struct Dispatch {
    pub target: HandlerTarget,
    pub result: Result<HandlerReport, HandlerError>,
}

impl Dispatch {
    pub fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

/// Serializable summary of a [`Dispatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub target: HandlerTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<HandlerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Dispatch> for DispatchSummary {
    fn from(dispatch: &Dispatch) -> Self {
        match &dispatch.result {
            Ok(report) => Self {
                target: dispatch.target,
                report: Some(report.clone()),
                error: None,
            },
            Err(err) => Self {
                target: dispatch.target,
                report: None,
                error: Some(err.to_string()),
            },
        }
    }
}

pub struct EventRouter {
    table: RoutingTable,
    handlers: HashMap<HandlerTarget, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own target, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(handler.target(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Run every handler the table selects for `envelope`.
    ///
    /// Handlers run in rule order; one failing does not stop the others.
    pub fn route(&self, envelope: &EventEnvelope) -> Vec<Dispatch> {
        debug!(
            event_id = %envelope.event_id(),
            source = %envelope.source(),
            bucket = envelope.object().bucket(),
            key = envelope.object().key(),
            status = %envelope.status(),
            "incoming status event"
        );

        let mut dispatches = Vec::new();
        for target in self.table.targets_for(envelope) {
            let Some(handler) = self.handlers.get(&target) else {
                warn!(handler = %target, event_id = %envelope.event_id(), "no handler registered");
                continue;
            };

            let result = handler.handle(envelope);
            match &result {
                Ok(report) => debug!(handler = %target, event_id = %envelope.event_id(), ?report, "handled"),
                Err(err) => error!(handler = %target, event_id = %envelope.event_id(), error = %err, "handler failed"),
            }
            dispatches.push(Dispatch { target, result });
        }
        dispatches
    }
}
