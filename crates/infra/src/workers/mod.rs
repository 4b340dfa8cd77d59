//! Background threads: the router worker consumes the bus, the drain
//! scheduler fires the retry drain at a fixed rate.

pub mod drain_scheduler;
pub mod router_worker;

pub use drain_scheduler::{DrainScheduler, DrainSchedulerHandle, SchedulerStats};
pub use router_worker::{RouterStats, RouterWorker, WorkerHandle};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Stats are plain counters; a panic mid-update cannot leave them unusable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
