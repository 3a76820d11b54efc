//! Fixed-window per-IP rate limiting
//!
//! Only `/v1/*` traffic is limited; the billing webhook and the root and
//! health endpoints bypass the limiter. Decisions for concurrent requests
//! from one IP are serialised by the entry lock, so the counter never
//! under-counts.

use std::collections::HashMap;

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

pub const WINDOW_SECONDS: i64 = 60;
pub const MAX_REQUESTS_PER_WINDOW: u32 = 100;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_seconds: i64,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check(&self, ip: &str) -> RateDecision {
        self.check_at(ip, Utc::now()).await
    }

    pub(crate) async fn check_at(&self, ip: &str, now: DateTime<Utc>) -> RateDecision {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(ip) {
            // A live window; at exactly `reset_at` a new window begins.
            Some(entry) if now < entry.reset_at => {
                if entry.count >= MAX_REQUESTS_PER_WINDOW {
                    let remaining_ms = (entry.reset_at - now).num_milliseconds();
                    RateDecision {
                        allowed: false,
                        retry_after_seconds: (remaining_ms + 999) / 1000,
                    }
                } else {
                    entry.count += 1;
                    RateDecision {
                        allowed: true,
                        retry_after_seconds: 0,
                    }
                }
            }
            _ => {
                entries.insert(
                    ip.to_string(),
                    RateLimitEntry {
                        count: 1,
                        reset_at: now + Duration::seconds(WINDOW_SECONDS),
                    },
                );
                RateDecision {
                    allowed: true,
                    retry_after_seconds: 0,
                }
            }
        }
    }
}

/// Client IP for rate-limiting: first `X-Forwarded-For` hop, else
/// `X-Real-IP`, else a shared `"unknown"` bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}
