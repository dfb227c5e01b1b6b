use axum::{extract::State, response::IntoResponse, Json};

use super::super::AppState;

/// `GET /health`
pub(crate) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
    }))
}
