use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    response::{IntoResponse, Response},
};

use crate::app::errors::join_error_to_response;
use crate::app::services::AppServices;

/// Run one drain cycle now; it counts towards the scheduler stats.
pub async fn run(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match tokio::task::spawn_blocking(move || services.pipeline().run_drain()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => join_error_to_response(err),
    }
}
