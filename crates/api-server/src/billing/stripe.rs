//! Thin client for the payments provider's REST API
//!
//! Only the three calls the server needs: create a checkout session,
//! create a customer-portal session, and retrieve a completed checkout
//! session. Requests are form-encoded with bearer authentication, as the
//! provider requires.

use serde::Deserialize;
use serde_json::Value;

use super::BillingError;

const API_BASE: &str = "https://api.stripe.com/v1";

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

/// Customer and subscription ids of a completed checkout session.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedCheckout {
    pub customer: Option<String>,
    pub subscription: Option<String>,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.into(),
            base_url: API_BASE.to_string(),
        }
    }

    /// Start a subscription checkout for `api_key`. The key and seat count
    /// ride along as session metadata so the completion webhook can
    /// activate the right ledger entry.
    pub async fn create_checkout_session(
        &self,
        price_id: &str,
        seats: u32,
        api_key: &str,
        app_url: &str,
    ) -> Result<CheckoutSession, BillingError> {
        let seats = seats.max(1).to_string();
        let success_url = format!("{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}", app_url);
        let cancel_url = format!("{}/billing", app_url);
        let params = [
            ("mode", "subscription"),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", seats.as_str()),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
            ("metadata[apiKey]", api_key),
            ("metadata[seats]", seats.as_str()),
        ];
        self.post_form("/checkout/sessions", &params).await
    }

    /// Start a customer-portal session for an existing customer.
    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        app_url: &str,
    ) -> Result<PortalSession, BillingError> {
        let return_url = format!("{}/billing", app_url);
        let params = [
            ("customer", customer_id),
            ("return_url", return_url.as_str()),
        ];
        self.post_form("/billing_portal/sessions", &params).await
    }

    /// Fetch the customer/subscription ids of a completed checkout.
    pub async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CompletedCheckout, BillingError> {
        let url = format!("{}/checkout/sessions/{}", self.base_url, session_id);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;
        Self::decode(response).await
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BillingError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.secret_key)
            .form(params)
            .send()
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, BillingError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| BillingError::Upstream(err.to_string()))?;

        if !status.is_success() {
            return Err(BillingError::Upstream(provider_error_message(
                status.as_u16(),
                &body,
            )));
        }
        serde_json::from_str(&body).map_err(|err| BillingError::Upstream(err.to_string()))
    }
}

/// Pull the human-readable message out of a provider error body, falling
/// back to the status code.
fn provider_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value["error"]["message"]
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("provider returned status {}", status))
}
