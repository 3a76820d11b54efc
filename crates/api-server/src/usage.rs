//! Plan tiers and the per-key usage ledger
//!
//! Every API key meters ingested events against a monthly budget scaled by
//! its plan and seat count. Billing periods are calendar months in UTC; the
//! counter resets lazily on the first access after a month boundary.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Monthly event budget for the free tier (seats pinned to 1).
pub const FREE_MONTHLY_EVENTS: u64 = 20_000;
/// Monthly event budget per seat on the pro tier.
pub const PRO_MONTHLY_EVENTS_PER_SEAT: u64 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    /// The monthly event cap for this plan at the given seat count.
    /// `None` means unbounded.
    pub fn effective_limit(self, seats: u32) -> Option<u64> {
        match self {
            Self::Free => Some(FREE_MONTHLY_EVENTS),
            Self::Pro => Some(PRO_MONTHLY_EVENTS_PER_SEAT * u64::from(seats.max(1))),
            Self::Enterprise => None,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Self::Free),
            "pro" => Some(Self::Pro),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// Usage record for one API key within the current billing period.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyUsage {
    pub plan: Plan,
    pub seats: u32,
    pub event_count: u64,
    pub billing_period_start: DateTime<Utc>,
}

impl ApiKeyUsage {
    fn new(plan: Plan, seats: u32, now: DateTime<Utc>) -> Self {
        Self {
            plan,
            seats: normalize_seats(plan, seats),
            event_count: 0,
            billing_period_start: month_start(now),
        }
    }

    pub fn effective_limit(&self) -> Option<u64> {
        self.plan.effective_limit(self.seats)
    }
}

/// Per-key usage counters behind one lock, so the billing-period roll and
/// the count increment are observed atomically.
#[derive(Debug)]
pub struct UsageLedger {
    /// Startup plan table; keys not present default to `(free, 1)`.
    assignments: HashMap<String, (Plan, u32)>,
    records: Mutex<HashMap<String, ApiKeyUsage>>,
}

impl UsageLedger {
    pub fn new(assignments: HashMap<String, (Plan, u32)>) -> Self {
        Self {
            assignments,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Current usage for a key, lazily creating the record and rolling the
    /// billing period forward when the UTC month has advanced.
    pub async fn get_usage(&self, api_key: &str) -> ApiKeyUsage {
        self.get_usage_at(api_key, Utc::now()).await
    }

    /// Add `count` events and report whether the new total strictly exceeds
    /// the effective limit. Over-limit events are still recorded; the
    /// caller decides how to respond.
    pub async fn track(&self, api_key: &str, count: u64) -> (ApiKeyUsage, bool) {
        self.track_at(api_key, count, Utc::now()).await
    }

    /// Move a key onto a new plan. The event counter and billing period are
    /// untouched; only the cap changes.
    pub async fn set_plan(&self, api_key: &str, plan: Plan, seats: u32) {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let record = self.record_entry(&mut records, api_key, now);
        record.plan = plan;
        record.seats = normalize_seats(plan, seats);
    }

    pub(crate) async fn get_usage_at(&self, api_key: &str, now: DateTime<Utc>) -> ApiKeyUsage {
        let mut records = self.records.lock().await;
        self.record_entry(&mut records, api_key, now).clone()
    }

    pub(crate) async fn track_at(
        &self,
        api_key: &str,
        count: u64,
        now: DateTime<Utc>,
    ) -> (ApiKeyUsage, bool) {
        let mut records = self.records.lock().await;
        let record = self.record_entry(&mut records, api_key, now);
        record.event_count += count;
        let exceeded = record
            .effective_limit()
            .is_some_and(|limit| record.event_count > limit);
        (record.clone(), exceeded)
    }

    fn record_entry<'a>(
        &self,
        records: &'a mut HashMap<String, ApiKeyUsage>,
        api_key: &str,
        now: DateTime<Utc>,
    ) -> &'a mut ApiKeyUsage {
        let record = records.entry(api_key.to_string()).or_insert_with(|| {
            let (plan, seats) = self
                .assignments
                .get(api_key)
                .copied()
                .unwrap_or((Plan::Free, 1));
            ApiKeyUsage::new(plan, seats, now)
        });
        roll_billing_period(record, now);
        record
    }
}

fn normalize_seats(plan: Plan, seats: u32) -> u32 {
    match plan {
        Plan::Free => 1,
        _ => seats.max(1),
    }
}

/// Reset the counter when the current UTC month is past the period start.
fn roll_billing_period(record: &mut ApiKeyUsage, now: DateTime<Utc>) {
    let current = (now.year(), now.month());
    let period = (
        record.billing_period_start.year(),
        record.billing_period_start.month(),
    );
    if current > period {
        record.event_count = 0;
        record.billing_period_start = month_start(now);
    }
}

/// First instant of the UTC month containing `now`.
fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn ledger_with(key: &str, plan: Plan, seats: u32) -> UsageLedger {
        let mut assignments = HashMap::new();
        assignments.insert(key.to_string(), (plan, seats));
        UsageLedger::new(assignments)
    }

    #[test]
    fn effective_limits_per_plan() {
        assert_eq!(Plan::Free.effective_limit(1), Some(20_000));
        // Free seats are pinned to 1; extra seats change nothing.
        assert_eq!(Plan::Free.effective_limit(5), Some(20_000));
        assert_eq!(Plan::Pro.effective_limit(1), Some(100_000));
        assert_eq!(Plan::Pro.effective_limit(3), Some(300_000));
        assert_eq!(Plan::Enterprise.effective_limit(10), None);
    }

    #[tokio::test]
    async fn unknown_keys_default_to_free_tier() {
        let ledger = UsageLedger::new(HashMap::new());
        let usage = ledger.get_usage("sk_unknown").await;
        assert_eq!(usage.plan, Plan::Free);
        assert_eq!(usage.seats, 1);
        assert_eq!(usage.event_count, 0);
    }

    #[tokio::test]
    async fn count_at_limit_is_allowed_but_one_past_is_not() {
        let ledger = ledger_with("k", Plan::Free, 1);
        let now = instant("2026-01-10T12:00:00Z");

        let (usage, exceeded) = ledger.track_at("k", FREE_MONTHLY_EVENTS, now).await;
        assert_eq!(usage.event_count, FREE_MONTHLY_EVENTS);
        assert!(!exceeded);

        let (usage, exceeded) = ledger.track_at("k", 1, now).await;
        assert_eq!(usage.event_count, FREE_MONTHLY_EVENTS + 1);
        assert!(exceeded);
    }

    #[tokio::test]
    async fn enterprise_is_never_over_limit() {
        let ledger = ledger_with("k", Plan::Enterprise, 4);
        let (usage, exceeded) = ledger.track("k", 10_000_000).await;
        assert!(!exceeded);
        assert_eq!(usage.effective_limit(), None);
    }

    #[tokio::test]
    async fn pro_limit_scales_with_seats() {
        let ledger = ledger_with("k", Plan::Pro, 3);
        let (_, exceeded) = ledger.track("k", 300_000).await;
        assert!(!exceeded);
        let (_, exceeded) = ledger.track("k", 1).await;
        assert!(exceeded);
    }

    #[tokio::test]
    async fn counter_resets_after_month_boundary() {
        let ledger = ledger_with("k", Plan::Free, 1);
        let january = instant("2026-01-31T23:59:59Z");
        let february = instant("2026-02-01T00:00:01Z");

        ledger.track_at("k", 15_000, january).await;
        let (usage, exceeded) = ledger.track_at("k", 7, february).await;

        assert_eq!(usage.event_count, 7);
        assert!(!exceeded);
        assert_eq!(
            usage.billing_period_start,
            instant("2026-02-01T00:00:00Z")
        );
    }

    #[tokio::test]
    async fn same_month_access_does_not_roll() {
        let ledger = ledger_with("k", Plan::Free, 1);
        ledger.track_at("k", 5, instant("2026-03-01T00:00:00Z")).await;
        let usage = ledger
            .get_usage_at("k", instant("2026-03-31T23:59:59Z"))
            .await;
        assert_eq!(usage.event_count, 5);
    }

    #[tokio::test]
    async fn set_plan_keeps_the_running_count() {
        let ledger = UsageLedger::new(HashMap::new());
        ledger.track("k", 25_000).await;

        ledger.set_plan("k", Plan::Pro, 2).await;
        let usage = ledger.get_usage("k").await;
        assert_eq!(usage.plan, Plan::Pro);
        assert_eq!(usage.seats, 2);
        assert_eq!(usage.event_count, 25_000);
        assert_eq!(usage.effective_limit(), Some(200_000));

        ledger.set_plan("k", Plan::Free, 4).await;
        let usage = ledger.get_usage("k").await;
        assert_eq!(usage.seats, 1);
    }
}
