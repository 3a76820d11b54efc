//! Route handlers

pub mod actions;
pub mod anomalies;
pub mod audit;
pub mod billing;
pub mod health;
pub mod tasks;
pub mod trust;
pub mod usage;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::rate_limit::client_ip;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Authenticated identity of a `/v1` request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub api_key: String,
    pub project_id: String,
}

pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// The parser's failure reason is only surfaced in dev mode; production
/// gets the generic message.
pub(crate) fn map_json_rejection(
    state: &AppState,
    rejection: JsonRejection,
) -> (StatusCode, Json<ErrorResponse>) {
    let message = if state.config().dev_mode {
        format!("Invalid JSON body: {}", rejection.body_text())
    } else {
        "Invalid JSON body".to_string()
    };
    error_response(StatusCode::BAD_REQUEST, message)
}

/// Middleware enforcing the per-IP fixed window on the protected `/v1`
/// routes. Denials carry a `Retry-After` header.
pub(crate) async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers());
    let decision = state.rate_limiter().check(&ip).await;
    if decision.allowed {
        return next.run(request).await;
    }

    let mut response = error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "Rate limit exceeded. Try again shortly.",
    )
    .into_response();
    if let Ok(value) = HeaderValue::from_str(&decision.retry_after_seconds.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Validate the bearer key against the configured allow-list (compared in
/// constant time) and resolve the tenant from `X-Project-Id`. Every
/// authenticated handler calls this first.
pub(crate) fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<RequestContext, (StatusCode, Json<ErrorResponse>)> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            error_response(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header. Expected: Bearer <api_key>",
            )
        })?;

    let valid = state
        .config()
        .valid_api_keys
        .iter()
        .any(|key| bool::from(key.as_bytes().ct_eq(token.as_bytes())));
    if !valid {
        return Err(error_response(StatusCode::UNAUTHORIZED, "Invalid API key"));
    }

    let project_id = headers
        .get("x-project-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|project| !project.is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Missing X-Project-Id header"))?;

    Ok(RequestContext {
        api_key: token.to_string(),
        project_id: project_id.to_string(),
    })
}

pub(crate) fn map_core_error(error: kontext_core::Error) -> (StatusCode, Json<ErrorResponse>) {
    use kontext_core::Error;

    let status = match &error {
        Error::InvalidInput(_) | Error::MissingEvidence(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::Expired => StatusCode::CONFLICT,
        Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, error.to_string())
}

pub(crate) fn map_billing_error(
    error: crate::billing::BillingError,
) -> (StatusCode, Json<ErrorResponse>) {
    use crate::billing::BillingError;

    let status = match &error {
        BillingError::MissingSignature
        | BillingError::MalformedHeader
        | BillingError::InvalidSignature
        | BillingError::StaleTimestamp
        | BillingError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
        BillingError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        BillingError::Upstream(_) => StatusCode::BAD_GATEWAY,
    };
    error_response(status, error.to_string())
}
