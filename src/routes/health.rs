//! Health check endpoints

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    pub storage: &'static str,
    pub active_uploads: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "chunkvault",
        storage: state.transfers().remote_name(),
        active_uploads: state.transfers().tracker().active(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}
