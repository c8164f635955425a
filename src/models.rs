// src/models.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{phone, plans};

pub const SESSION_TTL_DAYS: i64 = 30;

const DAY_MS: f64 = 86_400_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    /// Reserved. No flow moves a claim here on its own and it grants no access.
    Verified,
    Active,
    Expired,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Verified => "verified",
            PaymentStatus::Active => "active",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "verified" => Ok(PaymentStatus::Verified),
            "active" => Ok(PaymentStatus::Active),
            "expired" => Ok(PaymentStatus::Expired),
            "rejected" => Ok(PaymentStatus::Rejected),
            other => Err(other.to_string()),
        }
    }
}

/// A user's claim that they paid the till. `transaction_code` is the M-Pesa
/// receipt reference and is unique across all claims.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentClaim {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub transaction_code: String,
    pub plan_id: String,
    pub amount: i64,
    pub till_number: String,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub game_name: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl PaymentClaim {
    /// Stored status with lazy expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PaymentStatus {
        if self.status == PaymentStatus::Active && now > self.expires_at {
            PaymentStatus::Expired
        } else {
            self.status
        }
    }

    pub fn grants_access_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Active && self.expires_at > now
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Pending,
    Completed,
    Failed,
}

impl PushStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushStatus::Pending => "pending",
            PushStatus::Completed => "completed",
            PushStatus::Failed => "failed",
        }
    }
}

impl FromStr for PushStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PushStatus::Pending),
            "completed" => Ok(PushStatus::Completed),
            "failed" => Ok(PushStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushPaymentRequest {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub phone: String,
    pub amount: i64,
    pub plan_id: String,
    pub status: PushStatus,
    pub initiated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub receipt_number: Option<String>,
    pub transaction_date: Option<String>,
    pub failure_reason: Option<String>,
}

impl PushPaymentRequest {
    /// Access granted once this request completes: keyed by phone, starting
    /// at `at`, for the plan's period (monthly when the plan is unknown).
    pub fn subscription(&self, at: DateTime<Utc>) -> UserSubscription {
        UserSubscription {
            identity: self.phone.clone(),
            plan_id: self.plan_id.clone(),
            amount: self.amount,
            activated_at: at,
            expires_at: at + Duration::days(plans::duration_days_or_default(&self.plan_id)),
            is_active: true,
            receipt_number: self.receipt_number.clone(),
        }
    }
}

/// Outcome applied to a pending push request, exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum PushResolution {
    Completed {
        receipt_number: Option<String>,
        transaction_date: Option<String>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSubscription {
    /// Email for till claims, canonical phone for push payments.
    pub identity: String,
    pub plan_id: String,
    pub amount: i64,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub receipt_number: Option<String>,
}

impl UserSubscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub email: String,
    pub phone: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl Session {
    pub fn new(email: &str, phone: &str, full_name: &str, meta: &ClientMeta, now: DateTime<Utc>) -> Self {
        Session {
            id: Uuid::new_v4(),
            email: email.to_string(),
            phone: phone.to_string(),
            full_name: full_name.to_string(),
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
            last_active: now,
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip_address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCheck {
    Valid(Session),
    Expired,
    NotFound,
}

/// Who a status or history lookup is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Email(String),
    Phone(String),
}

impl Identity {
    /// Anything with an `@` is an email; anything that normalizes as a phone is
    /// a phone; everything else is matched as an email. Emails are compared
    /// lowercased.
    pub fn parse(raw: &str) -> Identity {
        let raw = raw.trim();
        if raw.contains('@') {
            return Identity::Email(raw.to_lowercase());
        }
        match phone::normalize(raw) {
            Ok(p) => Identity::Phone(p),
            Err(_) => Identity::Email(raw.to_lowercase()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identity::Email(s) | Identity::Phone(s) => s,
        }
    }

    pub fn matches(&self, claim: &PaymentClaim) -> bool {
        match self {
            Identity::Email(e) => claim.email == *e,
            Identity::Phone(p) => claim.phone == *p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimFilter {
    pub status: Option<PaymentStatus>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ClaimFilter {
    fn default() -> Self {
        ClaimFilter {
            status: None,
            date_from: None,
            date_to: None,
            search: None,
            page: 1,
            page_size: 10,
        }
    }
}

impl ClaimFilter {
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.page_size as usize
    }

    /// Everything except pagination. Search is a case-insensitive substring
    /// match on email, transaction code or full name.
    pub fn matches(&self, claim: &PaymentClaim) -> bool {
        if let Some(status) = self.status {
            if claim.status != status {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if claim.submitted_at < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if claim.submitted_at > to {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref() {
            let needle = search.to_lowercase();
            let hit = claim.email.to_lowercase().contains(&needle)
                || claim.transaction_code.to_lowercase().contains(&needle)
                || claim.full_name.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPage {
    pub items: Vec<PaymentClaim>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub page_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub total_payments: u64,
    pub pending_count: u64,
    pub active_users: u64,
    pub total_revenue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<ActiveSubscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSubscription {
    pub claim_id: Uuid,
    pub email: String,
    pub phone: String,
    pub plan_id: String,
    pub plan_name: String,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub days_remaining: i64,
}

/// `ceil((expiry - now) / 1 day)`, floored at zero.
pub fn days_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (expires_at - now).num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    (ms as f64 / DAY_MS).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(status: PaymentStatus, expires_in: Duration) -> PaymentClaim {
        let now = Utc::now();
        PaymentClaim {
            id: Uuid::new_v4(),
            full_name: "Jane Wanjiru".into(),
            email: "jane@example.com".into(),
            phone: "254712345678".into(),
            transaction_code: "QKX81PL2MZ".into(),
            plan_id: "monthly".into(),
            amount: 299,
            till_number: "889900".into(),
            submitted_at: now,
            expires_at: now + expires_in,
            status,
            verified_at: None,
            game_name: None,
            user_agent: None,
            ip_address: None,
        }
    }

    #[test]
    fn active_claim_expires_lazily() {
        let now = Utc::now();
        let c = claim(PaymentStatus::Active, Duration::days(-1));
        assert_eq!(c.status, PaymentStatus::Active);
        assert_eq!(c.effective_status(now), PaymentStatus::Expired);
        assert!(!c.grants_access_at(now));
    }

    #[test]
    fn verified_never_grants_access() {
        let c = claim(PaymentStatus::Verified, Duration::days(5));
        assert!(!c.grants_access_at(Utc::now()));
    }

    #[test]
    fn days_remaining_rounds_up() {
        let now = Utc::now();
        assert_eq!(days_remaining(now + Duration::days(30), now), 30);
        assert_eq!(days_remaining(now + Duration::days(30) - Duration::seconds(5), now), 30);
        assert_eq!(days_remaining(now + Duration::hours(1), now), 1);
        assert_eq!(days_remaining(now - Duration::hours(1), now), 0);
    }

    #[test]
    fn identity_parsing() {
        assert_eq!(Identity::parse(" Jane@Example.com "), Identity::Email("jane@example.com".into()));
        assert_eq!(Identity::parse("0712345678"), Identity::Phone("254712345678".into()));
        assert_eq!(Identity::parse("someone"), Identity::Email("someone".into()));
    }

    #[test]
    fn filter_search_is_or_across_fields_and_with_status() {
        let c = claim(PaymentStatus::Pending, Duration::days(30));
        let mut f = ClaimFilter { search: Some("qkx81".into()), ..Default::default() };
        assert!(f.matches(&c));
        f.search = Some("wanjiru".into());
        assert!(f.matches(&c));
        f.status = Some(PaymentStatus::Active);
        assert!(!f.matches(&c));
        f.status = None;
        f.search = Some("nobody".into());
        assert!(!f.matches(&c));
    }

    #[test]
    fn filter_offset() {
        let f = ClaimFilter { page: 3, page_size: 10, ..Default::default() };
        assert_eq!(f.offset(), 20);
        let f = ClaimFilter { page: 0, page_size: 10, ..Default::default() };
        assert_eq!(f.offset(), 0);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["pending", "verified", "active", "expired", "rejected"] {
            assert_eq!(s.parse::<PaymentStatus>().unwrap().as_str(), s);
        }
        assert!("paid".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn completed_push_grants_plan_period_keyed_by_phone() {
        let at = Utc::now();
        let request = PushPaymentRequest {
            checkout_request_id: "ws_CO_1".into(),
            merchant_request_id: None,
            phone: "254711000111".into(),
            amount: 2999,
            plan_id: "yearly".into(),
            status: PushStatus::Completed,
            initiated_at: at,
            resolved_at: Some(at),
            receipt_number: Some("NLJ7RT61SV".into()),
            transaction_date: None,
            failure_reason: None,
        };
        let sub = request.subscription(at);
        assert_eq!(sub.identity, "254711000111");
        assert_eq!(sub.expires_at - sub.activated_at, Duration::days(365));
        assert_eq!(sub.receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert!(sub.is_active_at(at));

        let odd = PushPaymentRequest {
            plan_id: "weekly".into(),
            ..request
        };
        assert_eq!(odd.subscription(at).expires_at - at, Duration::days(30));
    }
}
