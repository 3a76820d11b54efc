//! Application state

use std::sync::Arc;

use kontext_core::store::Store;

use crate::billing::BillingState;
use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::usage::UsageLedger;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    store: Store,
    rate_limiter: RateLimiter,
    usage: UsageLedger,
    billing: BillingState,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let usage = UsageLedger::new(config.plan_assignments.clone());
        let billing = BillingState::from_config(&config);
        Self {
            inner: Arc::new(AppStateInner {
                store: Store::new(),
                rate_limiter: RateLimiter::new(),
                usage,
                billing,
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.inner.usage
    }

    pub fn billing(&self) -> &BillingState {
        &self.inner.billing
    }
}
