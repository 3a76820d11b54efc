//! Transaction anomaly screening

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;

use kontext_core::anomaly::{evaluate_transaction, AnomalyRecord, TransactionCandidate};

use crate::state::AppState;

use super::{authenticate, error_response, map_json_rejection, ErrorResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateResponse {
    evaluated: bool,
    anomaly_count: usize,
    anomalies: Vec<AnomalyRecord>,
    timestamp: DateTime<Utc>,
}

async fn evaluate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<EvaluateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;
    let Json(body) = body.map_err(|rejection| map_json_rejection(&state, rejection))?;
    let candidate = TransactionCandidate::from_body(&body)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "agentId is required"))?;

    let now = Utc::now();
    let recent_count = state
        .store()
        .count_actions_since(&ctx.project_id, &candidate.agent_id, now - Duration::hours(1))
        .await;

    let anomalies = evaluate_transaction(&ctx.project_id, &candidate, recent_count, now);
    for anomaly in &anomalies {
        state.store().add_anomaly(&ctx.project_id, anomaly.clone()).await;
    }

    Ok(Json(EvaluateResponse {
        evaluated: true,
        anomaly_count: anomalies.len(),
        anomalies,
        timestamp: now,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/anomalies/evaluate", post(evaluate))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::routes::test_support::{build_state, TEST_API_KEY};

    fn evaluate_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/anomalies/evaluate")
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", TEST_API_KEY))
            .header("X-Project-Id", "p1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn large_amount_produces_a_critical_anomaly() {
        let state = build_state();
        let app = super::router().with_state(state.clone());

        let response = app
            .oneshot(evaluate_request(json!({
                "agentId": "g1",
                "amount": 60_000,
                "txHash": "0xabc",
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let payload = json_body(response).await;
        assert_eq!(payload["evaluated"], true);
        assert_eq!(payload["anomalyCount"], 1);
        assert_eq!(payload["anomalies"][0]["type"], "unusualAmount");
        assert_eq!(payload["anomalies"][0]["severity"], "critical");
        assert_eq!(payload["anomalies"][0]["reviewed"], false);

        // Persisted for the project.
        let export = state.store().export_data("p1", &Default::default()).await;
        assert_eq!(export.anomalies.len(), 1);
    }

    #[tokio::test]
    async fn threshold_amount_produces_nothing() {
        let app = super::router().with_state(build_state());
        let response = app
            .oneshot(evaluate_request(json!({"agentId": "g1", "amount": 10_000.00})))
            .await
            .unwrap();
        let payload = json_body(response).await;
        assert_eq!(payload["anomalyCount"], 0);
    }

    #[tokio::test]
    async fn missing_agent_id_is_rejected() {
        let app = super::router().with_state(build_state());
        let response = app
            .oneshot(evaluate_request(json!({"amount": 60_000})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn busy_agents_trigger_a_frequency_spike() {
        let state = build_state();

        let now = chrono::Utc::now();
        let mut records = Vec::new();
        for i in 0..31 {
            let action: kontext_core::action::NewAction = serde_json::from_value(json!({
                "id": format!("a{}", i),
                "type": "transaction",
                "agentId": "g1",
            }))
            .unwrap();
            records.push(action.into_record("p1", now).unwrap());
        }
        state.store().add_actions("p1", records).await;

        let app = super::router().with_state(state);
        let response = app
            .oneshot(evaluate_request(json!({"agentId": "g1", "amount": 5})))
            .await
            .unwrap();
        let payload = json_body(response).await;
        assert_eq!(payload["anomalyCount"], 1);
        assert_eq!(payload["anomalies"][0]["type"], "frequencySpike");
        assert_eq!(payload["anomalies"][0]["data"]["count"], 31);
        assert_eq!(payload["anomalies"][0]["data"]["threshold"], 30);
    }
}
