//! Per-domain usage counters bucketed by calendar day.
//!
//! Usage is approximate and minute-granular. Buckets are keyed by local
//! calendar day (`%Y-%m-%d`) and only ever incremented within a day.
//! Weekly usage is derived, never stored: it is recomputed on each query
//! as the sum of buckets inside the current week window. Old buckets are
//! never deleted; previous weeks fall out of the window naturally.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::site::{SiteKey, SitePolicy};
use crate::store::{KeyValueStore, StoreAdapter};

/// Day-bucket key format (local calendar day).
pub const DAY_FORMAT: &str = "%Y-%m-%d";

/// Bucket key for a calendar day.
pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

/// Start of the week containing `date` (weeks start on Sunday, local time).
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = date.weekday().num_days_from_sunday() as u64;
    date.checked_sub_days(Days::new(back)).unwrap_or(date)
}

/// Daily usage buckets for one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLedger {
    #[serde(default)]
    pub daily: BTreeMap<String, u32>,
}

impl UsageLedger {
    /// Minutes spent on the given day.
    pub fn minutes_on(&self, date: NaiveDate) -> u32 {
        self.daily.get(&day_key(date)).copied().unwrap_or(0)
    }

    /// Add minutes to the day's bucket, creating it if absent.
    pub fn record(&mut self, date: NaiveDate, minutes: u32) {
        let bucket = self.daily.entry(day_key(date)).or_insert(0);
        *bucket = bucket.saturating_add(minutes);
    }

    /// Minutes spent in `[week_start(today), today]`, the week-start bucket
    /// included. Buckets with unparseable keys are skipped, not propagated.
    pub fn weekly_minutes(&self, today: NaiveDate) -> u32 {
        let start = week_start(today);
        self.daily
            .iter()
            .filter_map(|(key, minutes)| {
                match NaiveDate::parse_from_str(key, DAY_FORMAT) {
                    Ok(date) if date >= start && date <= today => Some(*minutes),
                    Ok(_) => None,
                    Err(_) => {
                        debug!(key, "skipping malformed day bucket");
                        None
                    }
                }
            })
            .fold(0u32, u32::saturating_add)
    }

    /// Lossy decode from a raw store value: valid `{date -> minutes}`
    /// entries are kept, anything malformed is discarded.
    pub fn from_value(value: &Value) -> Self {
        let mut ledger = Self::default();
        let Some(daily) = value.get("daily").and_then(Value::as_object) else {
            return ledger;
        };
        for (key, minutes) in daily {
            match minutes.as_u64() {
                Some(m) => {
                    ledger
                        .daily
                        .insert(key.clone(), u32::try_from(m).unwrap_or(u32::MAX));
                }
                None => debug!(key, "discarding non-numeric usage bucket"),
            }
        }
        ledger
    }
}

/// True iff the domain is currently over its daily or weekly limit.
///
/// Both limits are evaluated independently; a limit of 0 never triggers.
pub fn is_over_limit(policy: &SitePolicy, ledger: &UsageLedger, today: NaiveDate) -> bool {
    if policy.daily_limit_minutes > 0 && ledger.minutes_on(today) >= policy.daily_limit_minutes {
        return true;
    }
    if policy.weekly_limit_minutes > 0
        && ledger.weekly_minutes(today) >= policy.weekly_limit_minutes
    {
        return true;
    }
    false
}

/// True iff the domain is enabled and over limit.
pub fn should_block(policy: &SitePolicy, ledger: &UsageLedger, today: NaiveDate) -> bool {
    policy.enabled && is_over_limit(policy, ledger, today)
}

/// Outcome of a recorded usage delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageUpdate {
    /// Today's total after the update.
    pub today_minutes: u32,
    /// Whether this delta moved the domain from under to over its limit.
    pub crossed_limit: bool,
}

/// Owns the `usage_<domain>` ledgers; single writer of usage state.
#[derive(Clone)]
pub struct UsageAggregator<S> {
    adapter: StoreAdapter<S>,
}

impl<S: KeyValueStore> UsageAggregator<S> {
    pub fn new(adapter: StoreAdapter<S>) -> Self {
        Self { adapter }
    }

    /// Add `minutes_delta` to today's bucket for `domain`.
    ///
    /// A read-modify-write over the shared store; lost updates under
    /// concurrent writers are accepted (writers are serialized by page
    /// lifecycle in practice). A zero delta performs no store write.
    pub async fn record_usage(
        &self,
        domain: &SiteKey,
        minutes_delta: u32,
        today: NaiveDate,
    ) -> Result<UsageUpdate> {
        let mut ledger = self.adapter.usage(domain).await?;
        if minutes_delta == 0 {
            return Ok(UsageUpdate {
                today_minutes: ledger.minutes_on(today),
                crossed_limit: false,
            });
        }

        let policy = self.adapter.blocked_sites().await?.remove(domain);
        let over_before = policy
            .as_ref()
            .is_some_and(|p| is_over_limit(p, &ledger, today));

        ledger.record(today, minutes_delta);
        self.adapter.set_usage(domain, &ledger).await?;

        let over_after = policy
            .as_ref()
            .is_some_and(|p| is_over_limit(p, &ledger, today));
        Ok(UsageUpdate {
            today_minutes: ledger.minutes_on(today),
            crossed_limit: !over_before && over_after,
        })
    }

    /// Whether `domain` is currently over the given policy's limits.
    pub async fn is_over_limit(
        &self,
        domain: &SiteKey,
        policy: &SitePolicy,
        today: NaiveDate,
    ) -> Result<bool> {
        let ledger = self.adapter.usage(domain).await?;
        Ok(is_over_limit(policy, &ledger, today))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn week_starts_on_sunday() {
        // 2024-01-07 is a Sunday.
        assert_eq!(week_start(date(2024, 1, 7)), date(2024, 1, 7));
        assert_eq!(week_start(date(2024, 1, 8)), date(2024, 1, 7));
        assert_eq!(week_start(date(2024, 1, 13)), date(2024, 1, 7));
        assert_eq!(week_start(date(2024, 1, 14)), date(2024, 1, 14));
    }

    #[test]
    fn accumulation_is_order_independent() {
        let today = date(2024, 1, 8);
        let mut a = UsageLedger::default();
        a.record(today, 7);
        a.record(today, 5);
        let mut b = UsageLedger::default();
        b.record(today, 5);
        b.record(today, 7);
        assert_eq!(a.minutes_on(today), 12);
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn accumulation_commutes(deltas in proptest::collection::vec(0u32..10_000, 0..16)) {
            let today = date(2024, 1, 8);
            let mut forward = UsageLedger::default();
            for d in &deltas {
                forward.record(today, *d);
            }
            let mut reverse = UsageLedger::default();
            for d in deltas.iter().rev() {
                reverse.record(today, *d);
            }
            prop_assert_eq!(forward.minutes_on(today), reverse.minutes_on(today));
        }
    }

    #[test]
    fn weekly_window_excludes_previous_week() {
        // Sundays: 2024-01-07 and 2024-01-14.
        let mut ledger = UsageLedger::default();
        ledger.record(date(2024, 1, 7), 40);
        ledger.record(date(2024, 1, 8), 30);
        ledger.record(date(2024, 1, 14), 10);

        // On the second Sunday, the prior week is excluded.
        assert_eq!(ledger.weekly_minutes(date(2024, 1, 14)), 10);
        // On the Monday after the first Sunday, both buckets count.
        assert_eq!(ledger.weekly_minutes(date(2024, 1, 8)), 70);
    }

    #[test]
    fn weekly_window_is_bounded_by_today() {
        let mut ledger = UsageLedger::default();
        ledger.record(date(2024, 1, 8), 30);
        ledger.record(date(2024, 1, 10), 20);
        // Querying as of the 9th must not count the future bucket.
        assert_eq!(ledger.weekly_minutes(date(2024, 1, 9)), 30);
    }

    #[test]
    fn malformed_buckets_are_skipped() {
        let value = serde_json::json!({
            "daily": {
                "2024-01-08": 30,
                "not-a-date": 99,
                "2024-01-09": "ten",
            }
        });
        let ledger = UsageLedger::from_value(&value);
        // Non-numeric minutes dropped at decode time.
        assert_eq!(ledger.daily.len(), 2);
        // Unparseable date keys survive decode but are excluded by queries.
        assert_eq!(ledger.weekly_minutes(date(2024, 1, 8)), 30);
    }

    #[test]
    fn over_limit_is_monotone_within_window() {
        let policy = SitePolicy::limited(60, 0);
        let today = date(2024, 1, 8);
        let mut ledger = UsageLedger::default();
        ledger.record(today, 59);
        assert!(!is_over_limit(&policy, &ledger, today));
        ledger.record(today, 1);
        assert!(is_over_limit(&policy, &ledger, today));
        // Usage never decreases, so further deltas keep it over.
        ledger.record(today, 5);
        assert!(is_over_limit(&policy, &ledger, today));
    }

    #[test]
    fn limits_evaluate_independently() {
        let today = date(2024, 1, 8);
        let mut ledger = UsageLedger::default();
        ledger.record(today, 50);

        // Weekly exceeded even though daily is not.
        let policy = SitePolicy::limited(60, 40);
        assert!(is_over_limit(&policy, &ledger, today));

        // Zero limits never trigger.
        let unlimited = SitePolicy::limited(0, 0);
        assert!(!is_over_limit(&unlimited, &ledger, today));
    }

    #[test]
    fn disabled_policy_never_blocks() {
        let today = date(2024, 1, 8);
        let mut ledger = UsageLedger::default();
        ledger.record(today, 999);
        let mut policy = SitePolicy::limited(60, 300);
        policy.enabled = false;
        assert!(is_over_limit(&policy, &ledger, today));
        assert!(!should_block(&policy, &ledger, today));
    }
}
