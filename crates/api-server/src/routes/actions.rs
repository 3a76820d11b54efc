//! Batch action ingestion

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kontext_core::action::NewAction;

use crate::state::AppState;
use crate::usage::{ApiKeyUsage, Plan};

use super::{authenticate, error_response, map_core_error, map_json_rejection, ErrorResponse};

#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(default)]
    actions: Option<Vec<NewAction>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    success: bool,
    received: usize,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit_exceeded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<UsageSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageSummary {
    plan: Plan,
    event_count: u64,
    limit: Option<u64>,
}

async fn ingest_actions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;
    let Json(request) = body.map_err(|rejection| map_json_rejection(&state, rejection))?;
    let actions = request
        .actions
        .filter(|actions| !actions.is_empty())
        .ok_or_else(|| {
            error_response(StatusCode::BAD_REQUEST, "actions must be a non-empty array")
        })?;

    let now = Utc::now();
    let mut records = Vec::with_capacity(actions.len());
    for action in actions {
        let record = action
            .into_record(&ctx.project_id, now)
            .map_err(map_core_error)?;
        records.push(record);
    }

    let received = records.len();
    let (usage, limit_exceeded) = state.usage().track(&ctx.api_key, received as u64).await;
    state.store().add_actions(&ctx.project_id, records).await;

    let mut response = if limit_exceeded {
        over_limit_response(&state, &usage, received, now)
    } else {
        Json(IngestResponse {
            success: true,
            received,
            timestamp: now,
            limit_exceeded: None,
            message: None,
            usage: None,
        })
        .into_response()
    };
    apply_usage_headers(&mut response, &usage);
    Ok(response)
}

fn over_limit_response(
    state: &AppState,
    usage: &ApiKeyUsage,
    received: usize,
    now: DateTime<Utc>,
) -> Response {
    let limit = usage.effective_limit().unwrap_or_default();
    let body = IngestResponse {
        success: true,
        received,
        timestamp: now,
        limit_exceeded: Some(true),
        message: Some(format!(
            "Monthly event limit of {} reached. Upgrade your plan at {}/billing to keep full coverage.",
            limit,
            state.config().app_url
        )),
        usage: Some(UsageSummary {
            plan: usage.plan,
            event_count: usage.event_count,
            limit: usage.effective_limit(),
        }),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

/// Attach `X-Kontext-Usage` / `X-Kontext-Limit` to an ingest response,
/// whether it was a 200 or an over-limit 429.
fn apply_usage_headers(response: &mut Response, usage: &ApiKeyUsage) {
    let limit = usage
        .effective_limit()
        .map(|limit| limit.to_string())
        .unwrap_or_else(|| "unlimited".to_string());

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&usage.event_count.to_string()) {
        headers.insert("x-kontext-usage", value);
    }
    if let Ok(value) = HeaderValue::from_str(&limit) {
        headers.insert("x-kontext-limit", value);
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/actions", post(ingest_actions))
}
