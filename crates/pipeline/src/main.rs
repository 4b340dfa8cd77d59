use std::sync::Arc;

use anyhow::Context;

use uploader_core::SystemClock;
use uploader_infra::config::PipelineConfig;
use uploader_pipeline::app::{self, services::AppServices};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    uploader_observability::init();

    let config = PipelineConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr.clone();

    let services = Arc::new(
        AppServices::build(config, Arc::new(SystemClock)).context("failed to assemble pipeline")?,
    );
    services.start().context("failed to start pipeline workers")?;

    let app = app::build_app(services.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Joining the workers blocks; keep it off the runtime threads.
    tokio::task::spawn_blocking(move || services.shutdown())
        .await
        .context("worker shutdown panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
