use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use uploader_infra::handlers::HandlerError;
use uploader_infra::object_store::ObjectStoreError;

pub fn handler_error_to_response(err: HandlerError) -> axum::response::Response {
    match err {
        HandlerError::Domain(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        HandlerError::Envelope(e) => json_error(StatusCode::BAD_REQUEST, "invalid_event", e.to_string()),
        HandlerError::UnexpectedStatus { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "unexpected_status", err.to_string())
        }
        HandlerError::ObjectStore(e) => json_error(StatusCode::BAD_GATEWAY, "object_store_error", e.to_string()),
        HandlerError::Queue(e) => json_error(StatusCode::BAD_GATEWAY, "queue_error", e.to_string()),
        HandlerError::Publish(e) => json_error(StatusCode::BAD_GATEWAY, "publish_error", e.to_string()),
    }
}

pub fn object_store_error_to_response(err: ObjectStoreError) -> axum::response::Response {
    match err {
        ObjectStoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        other => json_error(StatusCode::BAD_GATEWAY, "object_store_error", other.to_string()),
    }
}

pub fn join_error_to_response(err: tokio::task::JoinError) -> axum::response::Response {
    tracing::error!(error = %err, "blocking task failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "background task failed")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
