use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use uploader_infra::handlers::ObjectCreated;

use crate::app::errors::{handler_error_to_response, join_error_to_response, json_error};
use crate::app::services::AppServices;

/// Object-created notification in the storage service's native shape.
///
/// Parsed by hand rather than with `Json<_>` so every malformed body is a 400.
pub async fn receive(Extension(services): Extension<Arc<AppServices>>, body: Bytes) -> Response {
    let notification: ObjectCreated = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(err) => return json_error(StatusCode::BAD_REQUEST, "invalid_notification", err.to_string()),
    };

    let result = tokio::task::spawn_blocking(move || services.pipeline().ingest(&notification)).await;
    match result {
        Ok(Ok(envelope)) => (StatusCode::ACCEPTED, Json(envelope)).into_response(),
        Ok(Err(err)) => handler_error_to_response(err),
        Err(err) => join_error_to_response(err),
    }
}
