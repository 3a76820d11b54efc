//! Billing surface: checkout, portal, webhook, checkout resolution
//!
//! None of these routes pass through the bearer authenticator or the rate
//! limiter; the webhook is authenticated by its provider signature over
//! the raw body instead.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::billing::{translate_event, BillingAction, BillingError};
use crate::state::AppState;
use crate::usage::Plan;

use super::{error_response, map_billing_error, map_json_rejection, ErrorResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutRequest {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    seats: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResponse {
    session_id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortalRequest {
    #[serde(default)]
    customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SuccessQuery {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessResponse {
    customer_id: Option<String>,
    subscription_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    #[serde(rename = "type")]
    event_type: String,
    handled: bool,
    data: Value,
}

async fn create_checkout(
    State(state): State<AppState>,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = body.map_err(|rejection| map_json_rejection(&state, rejection))?;
    let api_key = request
        .api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "apiKey is required"))?;

    let billing = state.billing();
    let (stripe, price_id) = match (billing.stripe(), billing.pro_price_id()) {
        (Ok(stripe), Ok(price_id)) => (stripe, price_id),
        _ => return Err(map_billing_error(BillingError::NotConfigured)),
    };

    let session = stripe
        .create_checkout_session(
            price_id,
            request.seats.unwrap_or(1),
            &api_key,
            &state.config().app_url,
        )
        .await
        .map_err(map_billing_error)?;
    Ok(Json(CheckoutResponse {
        session_id: session.id,
        url: session.url,
    }))
}

async fn create_portal(
    State(state): State<AppState>,
    body: Result<Json<PortalRequest>, JsonRejection>,
) -> Result<Json<Value>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = body.map_err(|rejection| map_json_rejection(&state, rejection))?;
    let customer_id = request
        .customer_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "customerId is required"))?;

    let stripe = state.billing().stripe().map_err(map_billing_error)?;
    let session = stripe
        .create_portal_session(&customer_id, &state.config().app_url)
        .await
        .map_err(map_billing_error)?;
    Ok(Json(serde_json::json!({"url": session.url})))
}

async fn checkout_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session_id = query
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "session_id is required"))?;

    let stripe = state.billing().stripe().map_err(map_billing_error)?;
    let session = stripe
        .get_checkout_session(&session_id)
        .await
        .map_err(map_billing_error)?;
    Ok(Json(SuccessResponse {
        customer_id: session.customer,
        subscription_id: session.subscription,
    }))
}

async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, (StatusCode, Json<ErrorResponse>)> {
    let verifier = state.billing().verifier().map_err(map_billing_error)?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| map_billing_error(BillingError::MissingSignature))?;
    verifier
        .verify(signature, &body)
        .map_err(map_billing_error)?;

    let event: Value = serde_json::from_slice(&body)
        .map_err(|err| map_billing_error(BillingError::MalformedPayload(err.to_string())))?;

    let action = translate_event(&event);
    let handled = action.is_handled();
    apply_action(&state, action).await;

    Ok(Json(WebhookResponse {
        event_type: event
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        handled,
        data: event["data"]["object"].clone(),
    }))
}

/// Apply a verified event's internal action to the ledger. Events that
/// cannot be resolved to an API key are logged and acknowledged.
async fn apply_action(state: &AppState, action: BillingAction) {
    match action {
        BillingAction::ActivatePro {
            api_key,
            customer,
            seats,
        } => {
            let Some(api_key) = api_key else {
                tracing::warn!("Checkout completed without an apiKey in session metadata");
                return;
            };
            state.usage().set_plan(&api_key, Plan::Pro, seats).await;
            if let Some(customer) = customer {
                state.billing().remember_customer(&customer, &api_key).await;
            }
            tracing::info!(seats, "Activated pro plan from completed checkout");
        }
        BillingAction::DowngradeToFree { customer } => {
            let api_key = match customer {
                Some(ref customer) => state.billing().api_key_for_customer(customer).await,
                None => None,
            };
            match api_key {
                Some(api_key) => {
                    state.usage().set_plan(&api_key, Plan::Free, 1).await;
                    tracing::info!("Downgraded plan after subscription deletion");
                }
                None => {
                    tracing::warn!(?customer, "Subscription deleted for unknown customer");
                }
            }
        }
        BillingAction::UpdateSubscription {
            status,
            current_period_end,
        } => {
            tracing::info!(?status, ?current_period_end, "Subscription updated");
        }
        BillingAction::PaymentSucceeded { customer } => {
            tracing::info!(?customer, "Invoice payment succeeded");
        }
        BillingAction::PaymentFailed { customer } => {
            tracing::warn!(?customer, "Invoice payment failed");
        }
        BillingAction::Unhandled { event_type } => {
            tracing::info!(%event_type, "Acknowledged unhandled webhook event type");
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/checkout", post(create_checkout))
        .route("/v1/portal", post(create_portal))
        .route("/v1/checkout/success", get(checkout_success))
        .route("/v1/webhook/stripe", post(stripe_webhook))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::billing::WebhookVerifier;
    use crate::routes::test_support::{build_state, TEST_API_KEY, WEBHOOK_SECRET};
    use crate::usage::Plan;

    fn webhook_request(payload: &str, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/webhook/stripe")
            .header("Content-Type", "application/json")
            .header("Stripe-Signature", signature)
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    fn sign(payload: &str, secret: &str) -> String {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = WebhookVerifier::new(secret).sign(timestamp, payload.as_bytes());
        format!("t={},v1={}", timestamp, signature)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn verified_checkout_completion_activates_pro() {
        let state = build_state();
        let app = super::router().with_state(state.clone());

        let payload = json!({
            "type": "checkout.session.completed",
            "data": {"object": {
                "customer": "cus_123",
                "metadata": {"apiKey": TEST_API_KEY, "seats": "2"},
            }},
        })
        .to_string();

        let response = app
            .oneshot(webhook_request(&payload, &sign(&payload, WEBHOOK_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["type"], "checkout.session.completed");
        assert_eq!(body["handled"], true);

        let usage = state.usage().get_usage(TEST_API_KEY).await;
        assert_eq!(usage.plan, Plan::Pro);
        assert_eq!(usage.seats, 2);
        assert_eq!(
            state.billing().api_key_for_customer("cus_123").await,
            Some(TEST_API_KEY.to_string())
        );
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let app = super::router().with_state(build_state());
        let payload = json!({"type": "checkout.session.completed", "data": {"object": {}}})
            .to_string();

        let response = app
            .oneshot(webhook_request(&payload, &sign(&payload, "whsec_wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let app = super::router().with_state(build_state());
        let payload = json!({"type": "checkout.session.completed", "data": {"object": {}}})
            .to_string();

        let stale = chrono::Utc::now().timestamp() - 301;
        let signature = WebhookVerifier::new(WEBHOOK_SECRET).sign(stale, payload.as_bytes());
        let header = format!("t={},v1={}", stale, signature);

        let response = app.oneshot(webhook_request(&payload, &header)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let app = super::router().with_state(build_state());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/webhook/stripe")
            .header("Content-Type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged_unhandled() {
        let app = super::router().with_state(build_state());
        let payload = json!({"type": "customer.updated", "data": {"object": {}}}).to_string();

        let response = app
            .oneshot(webhook_request(&payload, &sign(&payload, WEBHOOK_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["type"], "customer.updated");
        assert_eq!(body["handled"], false);
    }

    #[tokio::test]
    async fn subscription_deletion_downgrades_known_customers() {
        let state = build_state();
        state
            .billing()
            .remember_customer("cus_123", TEST_API_KEY)
            .await;
        state.usage().set_plan(TEST_API_KEY, Plan::Pro, 3).await;
        let app = super::router().with_state(state.clone());

        let payload = json!({
            "type": "customer.subscription.deleted",
            "data": {"object": {"customer": "cus_123"}},
        })
        .to_string();
        let response = app
            .oneshot(webhook_request(&payload, &sign(&payload, WEBHOOK_SECRET)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let usage = state.usage().get_usage(TEST_API_KEY).await;
        assert_eq!(usage.plan, Plan::Free);
        assert_eq!(usage.seats, 1);
    }

    #[tokio::test]
    async fn checkout_requires_api_key_and_configuration() {
        let app = super::router().with_state(build_state());

        let missing_key = Request::builder()
            .method("POST")
            .uri("/v1/checkout")
            .header("Content-Type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.clone().oneshot(missing_key).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Stripe is not configured in the test state.
        let unconfigured = Request::builder()
            .method("POST")
            .uri("/v1/checkout")
            .header("Content-Type", "application/json")
            .body(Body::from(json!({"apiKey": TEST_API_KEY}).to_string()))
            .unwrap();
        let response = app.oneshot(unconfigured).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
