//! Audit export as JSON or CSV

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kontext_core::action::{parse_timestamp, ActionFilter, ActionRecord};
use kontext_core::anomaly::AnomalyRecord;
use kontext_core::task::Task;

use crate::state::AppState;

use super::{authenticate, error_response, ErrorResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportResponse {
    project_id: String,
    actions: Vec<ActionRecord>,
    tasks: Vec<Task>,
    anomalies: Vec<AnomalyRecord>,
    exported_at: DateTime<Utc>,
}

async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExportQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;

    let start_date = parse_date_param(query.start_date.as_deref())
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid startDate"))?;
    let end_date = parse_date_param(query.end_date.as_deref())
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid endDate"))?;

    let filter = ActionFilter {
        agent_id: query.agent_id.filter(|agent| !agent.trim().is_empty()),
        action_type: None,
        start_date,
        end_date,
    };
    let export = state.store().export_data(&ctx.project_id, &filter).await;

    if query.format.as_deref() == Some("csv") {
        return Ok(csv_response(&export.actions));
    }

    Ok(Json(ExportResponse {
        project_id: ctx.project_id,
        actions: export.actions,
        tasks: export.tasks,
        anomalies: export.anomalies,
        exported_at: Utc::now(),
    })
    .into_response())
}

fn parse_date_param(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ()> {
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(raw).map(Some).ok_or(()),
    }
}

/// One line per action, description quoted (embedded quotes doubled).
fn csv_response(actions: &[ActionRecord]) -> Response {
    let mut csv = String::from("id,timestamp,type,agentId,description\n");
    for action in actions {
        csv.push_str(&format!(
            "{},{},{},{},\"{}\"\n",
            action.id,
            action.timestamp.to_rfc3339(),
            action.action_type,
            action.agent_id,
            action.description.replace('"', "\"\""),
        ));
    }

    (
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"kontext-audit.csv\"",
            ),
        ],
        csv,
    )
        .into_response()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/audit/export", get(export))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use kontext_core::action::NewAction;

    use crate::routes::test_support::{build_state, TEST_API_KEY};
    use crate::state::AppState;

    fn export_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("Authorization", format!("Bearer {}", TEST_API_KEY))
            .header("X-Project-Id", "p1")
            .body(Body::empty())
            .unwrap()
    }

    async fn seed_actions(state: &AppState) {
        let mut records = Vec::new();
        for (id, description) in [("a1", "plain"), ("a2", "says \"hi\"")] {
            let action: NewAction = serde_json::from_value(json!({
                "id": id,
                "type": "transaction",
                "agentId": "g1",
                "timestamp": "2026-01-15T10:00:00Z",
                "description": description,
            }))
            .unwrap();
            records.push(action.into_record("p1", chrono::Utc::now()).unwrap());
        }
        state.store().add_actions("p1", records).await;
    }

    #[tokio::test]
    async fn json_export_includes_all_collections() {
        let state = build_state();
        seed_actions(&state).await;
        let app = super::router().with_state(state);

        let response = app.oneshot(export_request("/v1/audit/export")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["projectId"], "p1");
        assert_eq!(payload["actions"].as_array().unwrap().len(), 2);
        assert!(payload["tasks"].as_array().unwrap().is_empty());
        assert!(payload["anomalies"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn csv_export_quotes_descriptions() {
        let state = build_state();
        seed_actions(&state).await;
        let app = super::router().with_state(state);

        let response = app
            .oneshot(export_request("/v1/audit/export?format=csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/csv");
        assert_eq!(
            response.headers()["content-disposition"],
            "attachment; filename=\"kontext-audit.csv\""
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(body.to_vec()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("id,timestamp,type,agentId,description"));
        let first = lines.next().unwrap();
        assert!(first.starts_with("a1,2026-01-15T10:00:00+00:00,transaction,g1,\"plain\""));
        let second = lines.next().unwrap();
        assert!(second.ends_with("\"says \"\"hi\"\"\""));
    }

    #[tokio::test]
    async fn date_filter_narrows_the_export() {
        let state = build_state();
        seed_actions(&state).await;
        let app = super::router().with_state(state);

        let response = app
            .clone()
            .oneshot(export_request(
                "/v1/audit/export?startDate=2026-02-01T00:00:00Z",
            ))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&body).unwrap();
        assert!(payload["actions"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(export_request("/v1/audit/export?startDate=not-a-date"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
