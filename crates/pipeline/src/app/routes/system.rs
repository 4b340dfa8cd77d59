use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode};

use crate::app::services::{AppServices, StatsView};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> Json<StatsView> {
    Json(services.stats())
}
