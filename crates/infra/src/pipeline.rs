//! Wiring: builds collaborators and handlers from a [`PipelineConfig`] and
//! starts the background workers.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use uploader_core::Clock;
use uploader_events::{EventBus, EventEnvelope, Subscription};

use crate::api::SimulatedApi;
use crate::config::{ConfigError, PipelineConfig};
use crate::event_bus::PipelineBus;
use crate::handlers::{
    CopyTarget, DeleteMessageHandler, DeleteObjectHandler, DrainReport, DrainRetriesHandler,
    DrainSettings, HandlerError, IngestionHandler, InvokeApiHandler, ObjectCreated,
    SendToRetryHandler,
};
use crate::object_store::InMemoryObjectStore;
use crate::queue::{InMemoryRetryQueue, RetryQueue};
use crate::router::EventRouter;
use crate::workers::{
    DrainScheduler, DrainSchedulerHandle, RouterStats, RouterWorker, SchedulerStats, WorkerHandle,
};

/// Redis channel carrying status envelopes.
pub const STATUS_CHANNEL: &str = "uploader.status";

pub type SharedBus = Arc<PipelineBus>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    RedisBus(#[from] crate::event_bus::RedisBusError),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    RedisQueue(#[from] crate::queue::RedisQueueError),

    #[error("failed to spawn {worker}: {source}")]
    Spawn {
        worker: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Every collaborator and handler of one running system.
pub struct Pipeline {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    bus: SharedBus,
    store: Arc<InMemoryObjectStore>,
    queue: Arc<dyn RetryQueue>,
    ingestion: IngestionHandler<SharedBus>,
    router: Arc<EventRouter>,
    drain: DrainScheduler<SharedBus>,
}

impl Pipeline {
    /// In-memory bus and queue regardless of `redis_url`.
    pub fn in_memory(config: PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        let queue = Arc::new(InMemoryRetryQueue::new(&config.queue, clock.clone()));
        Self::assemble(config, clock, PipelineBus::in_memory(), queue)
    }

    /// Redis bus and queue when `redis_url` is set, in-memory otherwise.
    pub fn from_config(config: PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        match config.redis_url.clone() {
            Some(url) => Self::with_redis(config, clock, &url),
            None => Self::in_memory(config, clock),
        }
    }

    #[cfg(feature = "redis")]
    fn with_redis(config: PipelineConfig, clock: Arc<dyn Clock>, url: &str) -> Result<Self, PipelineError> {
        use crate::event_bus::RedisPubSubEventBus;
        use crate::queue::RedisStreamsRetryQueue;

        let bus = PipelineBus::Redis(RedisPubSubEventBus::new(url, STATUS_CHANNEL)?);
        let queue = Arc::new(RedisStreamsRetryQueue::connect(url, &config.queue, clock.clone())?);
        Self::assemble(config, clock, bus, queue)
    }

    #[cfg(not(feature = "redis"))]
    fn with_redis(config: PipelineConfig, clock: Arc<dyn Clock>, _url: &str) -> Result<Self, PipelineError> {
        tracing::warn!("UPLOADER_REDIS_URL is set but redis support is not compiled in, using in-memory transport");
        Self::in_memory(config, clock)
    }

    fn assemble(
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        bus: PipelineBus,
        queue: Arc<dyn RetryQueue>,
    ) -> Result<Self, PipelineError> {
        let policy = config.outcome_policy()?;
        let bus: SharedBus = Arc::new(bus);
        let store = Arc::new(InMemoryObjectStore::new(clock.clone()));
        let sources = &config.sources;

        let ingestion = IngestionHandler::new(store.clone(), bus.clone(), clock.clone(), sources.ingestion.clone());

        let copy = config.outbound_bucket.clone().map(|bucket| CopyTarget {
            bucket,
            prefix: config.copy_prefix.clone(),
        });
        let invoke = InvokeApiHandler::new(
            Arc::new(SimulatedApi::new(policy)),
            store.clone(),
            bus.clone(),
            clock.clone(),
            sources.invoke_api.clone(),
            copy,
        );

        let router = EventRouter::new(config.routing_table())
            .with_handler(Arc::new(invoke))
            .with_handler(Arc::new(SendToRetryHandler::new(queue.clone())))
            .with_handler(Arc::new(DeleteMessageHandler::new(queue.clone())))
            .with_handler(Arc::new(DeleteObjectHandler::new(store.clone())));

        let drain = DrainRetriesHandler::new(
            queue.clone(),
            bus.clone(),
            clock.clone(),
            sources.drain.clone(),
            DrainSettings::from(&config.drain),
        );
        let drain = DrainScheduler::new(Arc::new(drain), clock.clone());

        info!(
            transport = bus.transport(),
            queue_url = queue.queue_url(),
            inbound_bucket = %config.inbound_bucket,
            outbound_bucket = ?config.outbound_bucket,
            "pipeline assembled"
        );

        Ok(Self {
            config,
            clock,
            bus,
            store,
            queue,
            ingestion,
            router: Arc::new(router),
            drain,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn store(&self) -> &Arc<InMemoryObjectStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn RetryQueue> {
        &self.queue
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn drain(&self) -> &DrainScheduler<SharedBus> {
        &self.drain
    }

    pub fn subscribe(&self) -> Subscription<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Run ingestion for one object-created notification.
    pub fn ingest(&self, notification: &ObjectCreated) -> Result<EventEnvelope, HandlerError> {
        self.ingestion.handle(notification)
    }

    /// Run one drain cycle now.
    pub fn run_drain(&self) -> DrainReport {
        self.drain.run_once()
    }

    /// Start the router worker and the drain scheduler.
    pub fn start(&self) -> Result<RunningPipeline, PipelineError> {
        let router = RouterWorker::spawn("uploader-router", &self.bus, self.router.clone())
            .map_err(|source| PipelineError::Spawn {
                worker: "router worker",
                source,
            })?;

        let drain = match self.drain.spawn("uploader-drain", self.config.drain.period()) {
            Ok(drain) => drain,
            Err(source) => {
                router.shutdown();
                return Err(PipelineError::Spawn {
                    worker: "drain scheduler",
                    source,
                });
            }
        };

        info!(period_secs = self.config.drain.period_secs, "pipeline workers started");
        Ok(RunningPipeline { router, drain })
    }
}

/// Handles to the background workers of a started [`Pipeline`].
#[derive(Debug)]
pub struct RunningPipeline {
    router: WorkerHandle,
    drain: DrainSchedulerHandle,
}

impl RunningPipeline {
    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub fn drain_stats(&self) -> SchedulerStats {
        self.drain.stats()
    }

    /// Stop the scheduler first so no new events are drained onto a bus
    /// nobody consumes.
    pub fn shutdown(self) {
        self.drain.shutdown();
        self.router.shutdown();
        info!("pipeline workers stopped");
    }
}
