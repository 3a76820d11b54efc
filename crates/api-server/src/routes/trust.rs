//! On-demand trust scoring

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use kontext_core::trust::{compute_trust_score, TrustScore};

use crate::state::AppState;

use super::{authenticate, ErrorResponse};

async fn get_trust_score(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<Json<TrustScore>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;

    let aggregate = state
        .store()
        .get_trust_aggregate(&ctx.project_id, &agent_id)
        .await;
    let score = compute_trust_score(&agent_id, aggregate.as_ref(), Utc::now());
    Ok(Json(score))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/trust/{agent_id}", get(get_trust_score))
}
