use axum::{
    Router,
    routing::{get, post},
};

pub mod drain;
pub mod notifications;
pub mod objects;
pub mod system;

/// Router for every pipeline endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/notifications", post(notifications::receive))
        .route("/objects/:bucket/*key", get(objects::describe).put(objects::upload))
        .route("/drain", post(drain::run))
        .route("/stats", get(system::stats))
}
