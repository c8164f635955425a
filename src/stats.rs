// src/stats.rs

use chrono::{DateTime, Utc};

use crate::db::PaymentStore;
use crate::error::StoreError;
use crate::models::{PaymentClaim, PaymentStatus, PaymentStats};

/// Scans the store for the admin dashboard numbers.
pub async fn collect(store: &dyn PaymentStore, now: DateTime<Utc>) -> Result<PaymentStats, StoreError> {
    let total_payments = store.count_claims(None).await?;
    let pending_count = store.count_claims(Some(PaymentStatus::Pending)).await?;
    let active = store.claims_with_status(PaymentStatus::Active, None).await?;

    let (active_users, total_revenue) = active_totals(&active, now);
    Ok(PaymentStats {
        total_payments,
        pending_count,
        active_users,
        total_revenue,
    })
}

/// Count and revenue over claims that are active and unexpired. Anything
/// else contributes nothing.
pub fn active_totals(claims: &[PaymentClaim], now: DateTime<Utc>) -> (u64, i64) {
    claims
        .iter()
        .filter(|c| c.grants_access_at(now))
        .fold((0u64, 0i64), |(count, revenue), c| (count + 1, revenue.saturating_add(c.amount.max(0))))
}
