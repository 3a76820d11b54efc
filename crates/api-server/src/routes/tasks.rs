//! Confirmation task routes

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use kontext_core::task::{NewTask, Task, TaskStatus};

use crate::state::AppState;

use super::{authenticate, error_response, map_core_error, map_json_rejection, ErrorResponse};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    task: Task,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskListResponse {
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewTask>, JsonRejection>,
) -> Result<(StatusCode, Json<TaskResponse>), (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;
    let Json(input) = body.map_err(|rejection| map_json_rejection(&state, rejection))?;

    let task = Task::create(&ctx.project_id, input, Utc::now()).map_err(map_core_error)?;
    state.store().add_task(task.clone()).await;
    Ok((
        StatusCode::CREATED,
        Json(TaskResponse {
            success: Some(true),
            task,
        }),
    ))
}

async fn get_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;
    let task_id = parse_task_id(&id).ok_or_else(|| task_not_found(&id))?;

    let task = state
        .store()
        .get_task(&ctx.project_id, task_id)
        .await
        .ok_or_else(|| task_not_found(&id))?;
    Ok(Json(TaskResponse {
        success: None,
        task,
    }))
}

async fn list_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(parse_status(raw).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid status filter '{}'", raw),
            )
        })?),
    };

    let tasks = state.store().get_tasks(&ctx.project_id, status).await;
    Ok(Json(TaskListResponse { tasks }))
}

async fn confirm_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<TaskResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;
    let Json(body) = body.map_err(|rejection| map_json_rejection(&state, rejection))?;
    let evidence = body
        .get("evidence")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "Request body must contain \"evidence\" object",
            )
        })?;
    let task_id = parse_task_id(&id).ok_or_else(|| task_not_found(&id))?;

    let task = state
        .store()
        .confirm_task(&ctx.project_id, task_id, evidence)
        .await
        .map_err(map_core_error)?;
    Ok(Json(TaskResponse {
        success: Some(true),
        task,
    }))
}

async fn fail_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<FailRequest>>,
) -> Result<Json<TaskResponse>, (StatusCode, Json<ErrorResponse>)> {
    let ctx = authenticate(&state, &headers)?;
    let task_id = parse_task_id(&id).ok_or_else(|| task_not_found(&id))?;
    let reason = body.and_then(|Json(request)| request.reason);

    let task = state
        .store()
        .fail_task(&ctx.project_id, task_id, reason)
        .await
        .map_err(map_core_error)?;
    Ok(Json(TaskResponse {
        success: Some(true),
        task,
    }))
}

fn parse_task_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

fn task_not_found(id: &str) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::NOT_FOUND, format!("Task not found: {}", id))
}

fn parse_status(raw: &str) -> Option<TaskStatus> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pending" => Some(TaskStatus::Pending),
        "confirmed" => Some(TaskStatus::Confirmed),
        "failed" => Some(TaskStatus::Failed),
        "expired" => Some(TaskStatus::Expired),
        _ => None,
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/tasks", post(create_task).get(list_tasks))
        .route("/v1/tasks/{id}", get(get_task))
        .route("/v1/tasks/{id}/confirm", put(confirm_task))
        .route("/v1/tasks/{id}/fail", put(fail_task))
}
