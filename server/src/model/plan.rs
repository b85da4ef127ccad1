use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

use super::user::DEFAULT_PLAN;

const FALLBACK_FREE_QUOTA: i64 = 50;

/// Monthly transaction quota per plan name; a negative limit means unlimited.
/// Both the write path and the statistics endpoint read from here.
#[derive(Clone, Debug)]
pub struct PlanLimits {
    limits: HashMap<String, i64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quota {
    Unlimited,
    Monthly(u64),
}

impl PlanLimits {
    pub fn new(limits: HashMap<String, i64>) -> Self {
        PlanLimits { limits }
    }

    /// Raw limit as reported to clients (`-1` for unlimited). Unknown plans
    /// get the free plan's limit.
    pub fn limit(&self, plan: &str) -> i64 {
        self.limits
            .get(plan)
            .or_else(|| self.limits.get(DEFAULT_PLAN))
            .copied()
            .unwrap_or(FALLBACK_FREE_QUOTA)
    }

    pub fn quota(&self, plan: &str) -> Quota {
        let limit = self.limit(plan);
        if limit < 0 {
            Quota::Unlimited
        } else {
            Quota::Monthly(limit as u64)
        }
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert("free".to_string(), FALLBACK_FREE_QUOTA);
        limits.insert("premium".to_string(), -1);
        PlanLimits { limits }
    }
}

impl Quota {
    /// Whether one more record fits given `used` records this month.
    pub fn allows(self, used: u64) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::Monthly(limit) => used < limit,
        }
    }
}

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_else(|| now.naive_utc());
    Utc.from_utc_datetime(&first)
}
