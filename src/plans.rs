// src/plans.rs

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::PaymentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: &'static str,
    /// KSh, whole units.
    pub amount: i64,
    pub duration_days: i64,
    pub name: &'static str,
}

impl Plan {
    pub fn expiry_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + Duration::days(self.duration_days)
    }
}

pub const MONTHLY: Plan = Plan {
    id: "monthly",
    amount: 299,
    duration_days: 30,
    name: "Monthly Access",
};

pub const QUARTERLY: Plan = Plan {
    id: "quarterly",
    amount: 799,
    duration_days: 90,
    name: "Quarterly Access",
};

pub const YEARLY: Plan = Plan {
    id: "yearly",
    amount: 2999,
    duration_days: 365,
    name: "Yearly Access",
};

pub const PLANS: [Plan; 3] = [MONTHLY, QUARTERLY, YEARLY];

pub fn lookup(plan_id: &str) -> Result<Plan, PaymentError> {
    PLANS
        .iter()
        .find(|p| p.id == plan_id)
        .copied()
        .ok_or_else(|| PaymentError::InvalidPlan(plan_id.to_string()))
}

/// Duration rule for push payments, where the plan id is not validated up
/// front: unknown plans get the monthly period.
pub fn duration_days_or_default(plan_id: &str) -> i64 {
    lookup(plan_id).unwrap_or(MONTHLY).duration_days
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_plans() {
        let m = lookup("monthly").unwrap();
        assert_eq!((m.amount, m.duration_days), (299, 30));
        assert_eq!(lookup("quarterly").unwrap().amount, 799);
        assert_eq!(lookup("yearly").unwrap().duration_days, 365);
    }

    #[test]
    fn unknown_plan_is_rejected() {
        assert!(matches!(lookup("weekly"), Err(PaymentError::InvalidPlan(p)) if p == "weekly"));
        assert!(lookup("Monthly").is_err());
    }

    #[test]
    fn push_duration_falls_back_to_monthly() {
        assert_eq!(duration_days_or_default("yearly"), 365);
        assert_eq!(duration_days_or_default("lifetime"), 30);
    }

    #[test]
    fn expiry_adds_whole_days() {
        let start = Utc::now();
        assert_eq!(QUARTERLY.expiry_from(start) - start, Duration::days(90));
    }
}
