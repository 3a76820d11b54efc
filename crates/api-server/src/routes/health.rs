//! Service banner and liveness endpoints

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Index of the mounted routes, reported by the banner.
const ENDPOINTS: &[&str] = &[
    "GET /",
    "GET /health",
    "POST /v1/actions",
    "GET /v1/tasks",
    "POST /v1/tasks",
    "GET /v1/tasks/{id}",
    "PUT /v1/tasks/{id}/confirm",
    "PUT /v1/tasks/{id}/fail",
    "GET /v1/audit/export",
    "GET /v1/trust/{agentId}",
    "GET /v1/usage",
    "POST /v1/anomalies/evaluate",
    "POST /v1/checkout",
    "GET /v1/checkout/success",
    "POST /v1/portal",
    "POST /v1/webhook/stripe",
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BannerResponse {
    service: String,
    version: String,
    status: String,
    docs: String,
    endpoints: Vec<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
}

async fn banner(State(state): State<AppState>) -> Json<BannerResponse> {
    Json(BannerResponse {
        service: "kontext-api".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "ok".to_string(),
        docs: format!("{}/docs", state.config().app_url),
        endpoints: ENDPOINTS.to_vec(),
    })
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health_check))
}
