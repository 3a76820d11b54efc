//! Webhook signature verification and event translation
//!
//! The provider signs `"{timestamp}.{rawBody}"` with HMAC-SHA256 under the
//! shared webhook secret and sends the result as
//! `Stripe-Signature: t=<unix>,v1=<hex>`. Signatures are compared in
//! constant time; stale timestamps are rejected.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::BillingError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook timestamp, in seconds.
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

pub struct WebhookVerifier {
    secret: String,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds: DEFAULT_TOLERANCE_SECONDS,
        }
    }

    /// Override the timestamp tolerance. Zero or negative disables the
    /// staleness check.
    pub fn with_tolerance(mut self, tolerance_seconds: i64) -> Self {
        self.tolerance_seconds = tolerance_seconds;
        self
    }

    pub fn verify(&self, header: &str, payload: &[u8]) -> Result<(), BillingError> {
        self.verify_at(header, payload, chrono::Utc::now().timestamp())
    }

    fn verify_at(&self, header: &str, payload: &[u8], now_unix: i64) -> Result<(), BillingError> {
        let (timestamp, signatures) = parse_signature_header(header)?;

        if self.tolerance_seconds > 0 && now_unix - timestamp > self.tolerance_seconds {
            return Err(BillingError::StaleTimestamp);
        }

        let expected = self.signature_bytes(timestamp, payload);
        let matched = signatures
            .iter()
            .any(|candidate| bool::from(expected.ct_eq(candidate.as_slice())));
        if matched {
            Ok(())
        } else {
            Err(BillingError::InvalidSignature)
        }
    }

    /// Hex signature for a payload at a timestamp. Used by tests and by
    /// local tooling that replays webhooks.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> String {
        hex::encode(self.signature_bytes(timestamp, payload))
    }

    fn signature_bytes(&self, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Parse `t=<unix>,v1=<hex>[,v1=<hex>...]`. Elements under other schemes
/// are ignored, but at least one `v1` signature and a timestamp must be
/// present.
fn parse_signature_header(header: &str) -> Result<(i64, Vec<Vec<u8>>), BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for element in header.split(',') {
        let Some((key, value)) = element.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Ok((timestamp, signatures)),
        _ => Err(BillingError::MalformedHeader),
    }
}

/// Internal mutation derived from a verified webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum BillingAction {
    ActivatePro {
        api_key: Option<String>,
        customer: Option<String>,
        seats: u32,
    },
    UpdateSubscription {
        status: Option<String>,
        current_period_end: Option<i64>,
    },
    DowngradeToFree {
        customer: Option<String>,
    },
    PaymentSucceeded {
        customer: Option<String>,
    },
    PaymentFailed {
        customer: Option<String>,
    },
    Unhandled {
        event_type: String,
    },
}

impl BillingAction {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Unhandled { .. })
    }
}

/// Map a verified provider event onto an internal action. Unknown event
/// types are acknowledged, never rejected.
pub fn translate_event(event: &Value) -> BillingAction {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let object = &event["data"]["object"];

    match event_type {
        "checkout.session.completed" => BillingAction::ActivatePro {
            api_key: object["metadata"]["apiKey"]
                .as_str()
                .map(str::to_string),
            customer: object["customer"].as_str().map(str::to_string),
            seats: parse_seats(&object["metadata"]["seats"]),
        },
        "customer.subscription.updated" => BillingAction::UpdateSubscription {
            status: object["status"].as_str().map(str::to_string),
            current_period_end: object["current_period_end"].as_i64(),
        },
        "customer.subscription.deleted" => BillingAction::DowngradeToFree {
            customer: object["customer"].as_str().map(str::to_string),
        },
        "invoice.payment_succeeded" => BillingAction::PaymentSucceeded {
            customer: object["customer"].as_str().map(str::to_string),
        },
        "invoice.payment_failed" => BillingAction::PaymentFailed {
            customer: object["customer"].as_str().map(str::to_string),
        },
        other => BillingAction::Unhandled {
            event_type: other.to_string(),
        },
    }
}

/// Seat counts arrive as metadata strings or numbers; floor at 1.
fn parse_seats(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(1) as u32,
        Value::String(s) => s.trim().parse().unwrap_or(1),
        _ => 1,
    }
    .max(1)
}
