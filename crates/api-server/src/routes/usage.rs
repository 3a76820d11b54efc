//! Current usage and plan reporting

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;
use crate::usage::Plan;

use super::{authenticate, ErrorResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageResponse {
    plan: Plan,
    seats: u32,
    event_count: u64,
    limit: Option<u64>,
    remaining_events: Option<u64>,
    usage_percentage: f64,
    limit_exceeded: bool,
    billing_period_start: DateTime<Utc>,
    timestamp: DateTime<Utc>,
}

async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;

    let usage = state.usage().get_usage(&ctx.api_key).await;
    let limit = usage.effective_limit();
    let (remaining_events, usage_percentage, limit_exceeded) = match limit {
        Some(limit) => (
            Some(limit.saturating_sub(usage.event_count)),
            round2(usage.event_count as f64 / limit as f64 * 100.0),
            usage.event_count > limit,
        ),
        None => (None, 0.0, false),
    };

    Ok(Json(UsageResponse {
        plan: usage.plan,
        seats: usage.seats,
        event_count: usage.event_count,
        limit,
        remaining_events,
        usage_percentage,
        limit_exceeded,
        billing_period_start: usage.billing_period_start,
        timestamp: Utc::now(),
    }))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/usage", get(get_usage))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::routes::test_support::{build_state, build_state_with_plans, TEST_API_KEY};
    use crate::usage::Plan;

    fn usage_request() -> Request<Body> {
        Request::builder()
            .uri("/v1/usage")
            .header("Authorization", format!("Bearer {}", TEST_API_KEY))
            .header("X-Project-Id", "p1")
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn free_tier_usage_after_one_event() {
        let state = build_state();
        state.usage().track(TEST_API_KEY, 1).await;

        let app = super::router().with_state(state);
        let response = app.oneshot(usage_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let payload = json_body(response).await;
        assert_eq!(payload["plan"], "free");
        assert_eq!(payload["seats"], 1);
        assert_eq!(payload["eventCount"], 1);
        assert_eq!(payload["limit"], 20_000);
        assert_eq!(payload["remainingEvents"], 19_999);
        assert_eq!(payload["usagePercentage"], 0.01);
        assert_eq!(payload["limitExceeded"], false);
        assert!(payload["billingPeriodStart"].is_string());
    }

    #[tokio::test]
    async fn enterprise_reports_unlimited() {
        let state = build_state_with_plans(HashMap::from([(
            TEST_API_KEY.to_string(),
            (Plan::Enterprise, 4),
        )]));
        state.usage().track(TEST_API_KEY, 1_000_000).await;

        let app = super::router().with_state(state);
        let payload = json_body(app.oneshot(usage_request()).await.unwrap()).await;
        assert_eq!(payload["plan"], "enterprise");
        assert!(payload["limit"].is_null());
        assert!(payload["remainingEvents"].is_null());
        assert_eq!(payload["usagePercentage"], 0.0);
        assert_eq!(payload["limitExceeded"], false);
    }

    #[tokio::test]
    async fn requires_authentication() {
        let app = super::router().with_state(build_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/usage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
