//! Route modules for the Chunkvault server

pub mod files;
pub mod health;

use axum::{routing::get, Router};

use crate::state::AppState;

/// Build the application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/files", files::router())
        .route("/api/v1/stats", get(files::stats))
        .with_state(state)
}
