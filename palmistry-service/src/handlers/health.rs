use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use service_core::observability::get_metrics;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "palmistry-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once the vision provider reports it can serve requests.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.vision.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "model": state.config.vision.model,
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Vision provider not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": e.to_string()
                })),
            )
        }
    }
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
