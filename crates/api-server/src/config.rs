//! Server configuration
//!
//! Everything is read from the environment once at startup and is
//! read-only afterwards. API keys are operator-provisioned; plan
//! assignments map a subset of those keys to paid tiers.

use std::collections::{HashMap, HashSet};

use crate::usage::Plan;

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_APP_URL: &str = "https://kontext.cash";

const PRODUCTION_ORIGINS: &[&str] = &[
    "https://kontext.cash",
    "https://www.kontext.cash",
    "https://app.kontext.cash",
];

const DEV_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
];

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer tokens accepted by the authenticator.
    pub valid_api_keys: HashSet<String>,
    /// key -> (plan, seats); keys absent here meter as `(free, 1)`.
    pub plan_assignments: HashMap<String, (Plan, u32)>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_pro_price_id: Option<String>,
    pub allowed_origins: Vec<String>,
    pub app_url: String,
    pub dev_mode: bool,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let valid_api_keys = parse_api_keys(
            env_var("KONTEXT_API_KEY").as_deref(),
            env_var("KONTEXT_API_KEYS").as_deref(),
        );
        if valid_api_keys.is_empty() {
            tracing::warn!("No API keys configured; every /v1 request will be rejected");
        }

        let plan_assignments =
            parse_plan_assignments(env_var("KONTEXT_API_KEY_PLANS").as_deref().unwrap_or(""));

        let dev_mode = env_var("KONTEXT_ENV")
            .or_else(|| env_var("NODE_ENV"))
            .map(|raw| matches!(raw.trim(), "development" | "dev"))
            .unwrap_or(false);

        let extra_origins = env_var("KONTEXT_CORS_ORIGINS").unwrap_or_default();

        Self {
            valid_api_keys,
            plan_assignments,
            stripe_secret_key: env_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: env_var("STRIPE_WEBHOOK_SECRET"),
            stripe_pro_price_id: env_var("STRIPE_PRO_PRICE_ID"),
            allowed_origins: build_origin_allow_list(&extra_origins, dev_mode),
            app_url: env_var("KONTEXT_APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            dev_mode,
            port: env_var("PORT")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_api_keys(primary: Option<&str>, list: Option<&str>) -> HashSet<String> {
    let mut keys = HashSet::new();
    if let Some(primary) = primary {
        keys.insert(primary.to_string());
    }
    if let Some(list) = list {
        for key in list.split(',') {
            let key = key.trim();
            if !key.is_empty() {
                keys.insert(key.to_string());
            }
        }
    }
    keys
}

/// Parse `key:plan:seats` tuples. Seats default to 1 and are floored at 1;
/// entries with an unknown plan are skipped with a warning.
fn parse_plan_assignments(raw: &str) -> HashMap<String, (Plan, u32)> {
    let mut assignments = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.split(':');
        let key = parts.next().unwrap_or_default().trim();
        let plan = parts.next().unwrap_or_default().trim();
        let seats = parts
            .next()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .max(1);

        match Plan::parse(plan) {
            Some(plan) if !key.is_empty() => {
                assignments.insert(key.to_string(), (plan, seats));
            }
            _ => tracing::warn!("Ignoring malformed plan assignment entry '{}'", entry),
        }
    }
    assignments
}

fn build_origin_allow_list(extra: &str, dev_mode: bool) -> Vec<String> {
    let mut origins: Vec<String> = PRODUCTION_ORIGINS.iter().map(|o| o.to_string()).collect();
    for origin in extra.split(',') {
        let origin = origin.trim().trim_end_matches('/');
        if !origin.is_empty() && !origins.iter().any(|existing| existing == origin) {
            origins.push(origin.to_string());
        }
    }
    if dev_mode {
        for origin in DEV_ORIGINS {
            if !origins.iter().any(|existing| existing == origin) {
                origins.push(origin.to_string());
            }
        }
    }
    origins
}
