//! Publish/subscribe transport for status events.
//!
//! The bus only distributes; it does not match. Matching happens in the
//! consumer against a [`RoutingTable`](crate::routing::RoutingTable), so any
//! transport that can broadcast a message to every subscriber will do.
//!
//! Delivery is at-least-once and unordered. Every downstream action is
//! either idempotent (deletes) or routing-guarded (retry enqueue), so
//! duplicates are harmless.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end of a bus subscription.
///
/// Each subscription sees every message published after it was created.
/// Consume it from a single thread.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait up to `timeout`; workers use this to poll their shutdown signal.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Broadcast bus.
///
/// `publish` failures are surfaced to the publishing handler, which reports
/// them as errors: nothing downstream can react to an event that never left.
pub trait EventBus<M>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
