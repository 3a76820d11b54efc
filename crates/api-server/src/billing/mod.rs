//! Billing mediation for the external payments provider
//!
//! Webhook callbacks are authenticated by a provider-signed header over the
//! raw request body; verified events translate into plan and seat mutations
//! on the usage ledger. The synchronous surface (checkout, portal, session
//! retrieval) is a thin wrapper over the provider's REST API.

pub mod stripe;
pub mod webhook;

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::Config;
pub use stripe::StripeClient;
pub use webhook::{translate_event, BillingAction, WebhookVerifier};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Missing Stripe-Signature header")]
    MissingSignature,

    #[error("Malformed Stripe-Signature header")]
    MalformedHeader,

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Webhook timestamp is outside the allowed tolerance")]
    StaleTimestamp,

    #[error("Invalid webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Billing is not configured")]
    NotConfigured,

    #[error("Payments provider error: {0}")]
    Upstream(String),
}

/// Billing collaborators plus the customer-to-key pairings learned from
/// completed checkouts, which later subscription events resolve against.
pub struct BillingState {
    verifier: Option<WebhookVerifier>,
    stripe: Option<StripeClient>,
    pro_price_id: Option<String>,
    customers: Mutex<HashMap<String, String>>,
}

impl BillingState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            verifier: config
                .stripe_webhook_secret
                .as_deref()
                .map(WebhookVerifier::new),
            stripe: config.stripe_secret_key.as_deref().map(StripeClient::new),
            pro_price_id: config.stripe_pro_price_id.clone(),
            customers: Mutex::new(HashMap::new()),
        }
    }

    pub fn verifier(&self) -> Result<&WebhookVerifier, BillingError> {
        self.verifier.as_ref().ok_or(BillingError::NotConfigured)
    }

    pub fn stripe(&self) -> Result<&StripeClient, BillingError> {
        self.stripe.as_ref().ok_or(BillingError::NotConfigured)
    }

    pub fn pro_price_id(&self) -> Result<&str, BillingError> {
        self.pro_price_id
            .as_deref()
            .ok_or(BillingError::NotConfigured)
    }

    pub async fn remember_customer(&self, customer_id: &str, api_key: &str) {
        let mut customers = self.customers.lock().await;
        customers.insert(customer_id.to_string(), api_key.to_string());
    }

    pub async fn api_key_for_customer(&self, customer_id: &str) -> Option<String> {
        let customers = self.customers.lock().await;
        customers.get(customer_id).cloned()
    }
}
