use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use uploader_events::{EventBus, EventEnvelope, Subscription};

use super::lock;
use crate::router::EventRouter;

const TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub envelopes_seen: u64,
    pub dispatched: u64,
    pub handler_errors: u64,
}

/// Handle to control and join the router worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<RouterStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> RouterStats {
        lock(&self.stats).clone()
    }
}

/// Single consumer of the bus: every envelope goes through the router.
#[derive(Debug)]
pub struct RouterWorker;

impl RouterWorker {
    /// Subscribe now, then consume on a named thread.
    ///
    /// Subscribing before the thread starts means nothing published after
    /// `spawn` returns is missed.
    pub fn spawn<B>(name: &str, bus: &B, router: Arc<EventRouter>) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();
        let stats = Arc::new(Mutex::new(RouterStats::default()));
        let worker_stats = stats.clone();
        let worker = name.to_string();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&worker, sub, shutdown_rx, &router, &worker_stats))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop(
    name: &str,
    sub: Subscription<EventEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    router: &EventRouter,
    stats: &Mutex<RouterStats>,
) {
    info!(worker = name, "router worker started");
    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(TICK) {
            Ok(envelope) => {
                let dispatches = router.route(&envelope);
                let mut stats = lock(stats);
                stats.envelopes_seen += 1;
                stats.dispatched += dispatches.len() as u64;
                stats.handler_errors += dispatches.iter().filter(|d| d.is_err()).count() as u64;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!(worker = name, "bus subscription closed");
                break;
            }
        }
    }
    info!(worker = name, "router worker stopped");
}
