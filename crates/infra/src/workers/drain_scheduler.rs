//! Fixed-rate trigger for the retry drain.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use uploader_core::Clock;
use uploader_events::{EventBus, EventEnvelope};

use super::lock;
use crate::handlers::{DrainReport, DrainRetriesHandler, DrainStop};

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub republished: u64,
    pub skipped: u64,
    pub receive_errors: u64,
    pub last_report: Option<DrainReport>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    fn record(&mut self, report: &DrainReport, at: DateTime<Utc>) {
        self.cycles += 1;
        self.republished += report.republished as u64;
        self.skipped += report.skipped as u64;
        if report.stop == DrainStop::ReceiveError {
            self.receive_errors += 1;
        }
        self.last_report = Some(report.clone());
        self.last_run_at = Some(at);
    }
}

/// Runs drain cycles and keeps their statistics.
///
/// Cycles run either on the scheduler thread or on demand through
/// [`run_once`](Self::run_once); both feed the same stats.
pub struct DrainScheduler<B> {
    drain: Arc<DrainRetriesHandler<B>>,
    clock: Arc<dyn Clock>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl<B> Clone for DrainScheduler<B> {
    fn clone(&self) -> Self {
        Self {
            drain: self.drain.clone(),
            clock: self.clock.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<B> DrainScheduler<B>
where
    B: EventBus<EventEnvelope> + 'static,
{
    pub fn new(drain: Arc<DrainRetriesHandler<B>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            drain,
            clock,
            stats: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }

    pub fn run_once(&self) -> DrainReport {
        let started = self.clock.now();
        let report = self.drain.run();
        lock(&self.stats).record(&report, started);
        report
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.stats).clone()
    }

    /// Fire `run_once` every `period`, first one `period` after spawning.
    ///
    /// Ticks missed because a cycle overran are skipped, not queued up.
    pub fn spawn(&self, name: &str, period: Duration) -> io::Result<DrainSchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let scheduler = self.clone();
        let worker = name.to_string();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || scheduler_loop(&worker, &scheduler, period, shutdown_rx))?;

        Ok(DrainSchedulerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats: self.stats.clone(),
        })
    }
}

fn scheduler_loop<B>(
    name: &str,
    scheduler: &DrainScheduler<B>,
    period: Duration,
    shutdown_rx: mpsc::Receiver<()>,
) where
    B: EventBus<EventEnvelope> + 'static,
{
    let period = period.max(Duration::from_millis(1));
    info!(worker = name, period_secs = period.as_secs_f64(), "drain scheduler started");

    let mut next = Instant::now() + period;
    loop {
        let wait = next.saturating_duration_since(Instant::now());
        match shutdown_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        scheduler.run_once();

        next += period;
        let now = Instant::now();
        if next <= now {
            let missed = (now - next).as_nanos() / period.as_nanos() + 1;
            warn!(worker = name, missed, "drain cycle overran its period, skipping ticks");
            while next <= now {
                next += period;
            }
        }
    }
    info!(worker = name, "drain scheduler stopped");
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct DrainSchedulerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl DrainSchedulerHandle {
    /// Request graceful shutdown. An in-flight cycle finishes first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        lock(&self.stats).clone()
    }
}
