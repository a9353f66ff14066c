use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/execute", post(handlers::execute))
        .route("/validate", post(handlers::validate))
        .route("/exercises/:id/compare", post(handlers::compare))
        .route("/exercises/:id/check", get(handlers::check))
        .route("/exercises/:id/hints", get(handlers::hints))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
}
