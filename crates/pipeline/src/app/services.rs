use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::info;

use uploader_core::Clock;
use uploader_infra::config::PipelineConfig;
use uploader_infra::pipeline::{Pipeline, PipelineError, RunningPipeline};
use uploader_infra::workers::{RouterStats, SchedulerStats};

/// Shared state behind every route.
pub struct AppServices {
    pipeline: Pipeline,
    running: Mutex<Option<RunningPipeline>>,
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub transport: &'static str,
    pub queue_url: String,
    pub workers_running: bool,
    pub drain: SchedulerStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterStats>,
}

impl AppServices {
    /// Redis transport when configured, in-memory otherwise.
    pub fn build(config: PipelineConfig, clock: Arc<dyn Clock>) -> Result<Self, PipelineError> {
        Ok(Self::new(Pipeline::from_config(config, clock)?))
    }

    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            running: Mutex::new(None),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Start the router worker and drain scheduler; no-op when already running.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut running = self.running();
        if running.is_none() {
            *running = Some(self.pipeline.start()?);
        }
        Ok(())
    }

    /// Stop the workers, waiting for an in-flight drain cycle.
    pub fn shutdown(&self) {
        if let Some(running) = self.running().take() {
            running.shutdown();
            info!("services stopped");
        }
    }

    pub fn stats(&self) -> StatsView {
        let running = self.running();
        StatsView {
            transport: self.pipeline.bus().transport(),
            queue_url: self.pipeline.queue().queue_url().to_string(),
            workers_running: running.is_some(),
            drain: self.pipeline.drain().stats(),
            router: running.as_ref().map(|r| r.router_stats()),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningPipeline>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
