// src/db.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ClaimFilter, Identity, PaymentClaim, PaymentStatus, PushPaymentRequest, PushResolution, PushStatus,
    Session, UserSubscription,
};

/// Durable storage for claims, sessions, push requests and subscriptions.
///
/// Implementations must enforce transaction-code uniqueness on
/// `insert_claim` (returning [`StoreError::Conflict`]) and must only resolve
/// a push request that is still pending.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_claim(&self, claim: &PaymentClaim) -> Result<(), StoreError>;

    async fn get_claim(&self, id: Uuid) -> Result<Option<PaymentClaim>, StoreError>;

    async fn find_claim_by_transaction_code(&self, code: &str) -> Result<Option<PaymentClaim>, StoreError>;

    /// Sets the status and stamps `verified_at`. `None` when the id is unknown.
    async fn update_claim_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError>;

    /// Newest claim for the identity that is active and not yet expired.
    async fn find_active_claim(&self, identity: &Identity, now: DateTime<Utc>)
        -> Result<Option<PaymentClaim>, StoreError>;

    /// Newest first.
    async fn claims_for_identity(&self, identity: &Identity, limit: usize) -> Result<Vec<PaymentClaim>, StoreError>;

    /// Newest first.
    async fn claims_with_status(
        &self,
        status: PaymentStatus,
        limit: Option<usize>,
    ) -> Result<Vec<PaymentClaim>, StoreError>;

    async fn count_claims(&self, status: Option<PaymentStatus>) -> Result<u64, StoreError>;

    /// One page of matching claims, newest first, plus the total match count.
    async fn list_claims(&self, filter: &ClaimFilter) -> Result<(Vec<PaymentClaim>, u64), StoreError>;

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn insert_push_request(&self, request: &PushPaymentRequest) -> Result<(), StoreError>;

    async fn get_push_request(&self, checkout_request_id: &str) -> Result<Option<PushPaymentRequest>, StoreError>;

    /// Applies the resolution only if the request is still pending. A
    /// completed request's [`PushPaymentRequest::subscription`] is written in
    /// the same unit, so either both land or neither does. Returns the updated
    /// request, or `None` when it is unknown or already resolved.
    async fn resolve_push_request(
        &self,
        checkout_request_id: &str,
        resolution: &PushResolution,
        at: DateTime<Utc>,
    ) -> Result<Option<PushPaymentRequest>, StoreError>;

    async fn count_push_requests(&self) -> Result<u64, StoreError>;

    async fn upsert_subscription(&self, subscription: &UserSubscription) -> Result<(), StoreError>;

    async fn get_subscription(&self, identity: &str) -> Result<Option<UserSubscription>, StoreError>;

    async fn count_active_subscriptions(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

const CLAIM_COLUMNS: &str = "id, full_name, email, phone, transaction_code, plan_id, amount, till_number, \
     submitted_at, expires_at, status, verified_at, game_name, user_agent, ip_address";

const PUSH_COLUMNS: &str = "checkout_request_id, merchant_request_id, phone, amount, plan_id, status, \
     initiated_at, resolved_at, receipt_number, transaction_date, failure_reason";

const SUBSCRIPTION_COLUMNS: &str =
    "identity, plan_id, amount, activated_at, expires_at, is_active, receipt_number";

const SESSION_COLUMNS: &str =
    "id, email, phone, full_name, created_at, expires_at, last_active, user_agent, ip_address";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects and brings the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(PgStore { pool })
    }
}

fn claim_from_row(r: &PgRow) -> Result<PaymentClaim, StoreError> {
    let status: String = r.try_get("status")?;
    Ok(PaymentClaim {
        id: r.try_get("id")?,
        full_name: r.try_get("full_name")?,
        email: r.try_get("email")?,
        phone: r.try_get("phone")?,
        transaction_code: r.try_get("transaction_code")?,
        plan_id: r.try_get("plan_id")?,
        amount: r.try_get("amount")?,
        till_number: r.try_get("till_number")?,
        submitted_at: r.try_get("submitted_at")?,
        expires_at: r.try_get("expires_at")?,
        status: status
            .parse()
            .map_err(|s| StoreError::Corrupt(format!("claim status {s}")))?,
        verified_at: r.try_get("verified_at")?,
        game_name: r.try_get("game_name")?,
        user_agent: r.try_get("user_agent")?,
        ip_address: r.try_get("ip_address")?,
    })
}

fn push_from_row(r: &PgRow) -> Result<PushPaymentRequest, StoreError> {
    let status: String = r.try_get("status")?;
    Ok(PushPaymentRequest {
        checkout_request_id: r.try_get("checkout_request_id")?,
        merchant_request_id: r.try_get("merchant_request_id")?,
        phone: r.try_get("phone")?,
        amount: r.try_get("amount")?,
        plan_id: r.try_get("plan_id")?,
        status: status
            .parse()
            .map_err(|s| StoreError::Corrupt(format!("push status {s}")))?,
        initiated_at: r.try_get("initiated_at")?,
        resolved_at: r.try_get("resolved_at")?,
        receipt_number: r.try_get("receipt_number")?,
        transaction_date: r.try_get("transaction_date")?,
        failure_reason: r.try_get("failure_reason")?,
    })
}

fn subscription_from_row(r: &PgRow) -> Result<UserSubscription, StoreError> {
    Ok(UserSubscription {
        identity: r.try_get("identity")?,
        plan_id: r.try_get("plan_id")?,
        amount: r.try_get("amount")?,
        activated_at: r.try_get("activated_at")?,
        expires_at: r.try_get("expires_at")?,
        is_active: r.try_get("is_active")?,
        receipt_number: r.try_get("receipt_number")?,
    })
}

fn session_from_row(r: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: r.try_get("id")?,
        email: r.try_get("email")?,
        phone: r.try_get("phone")?,
        full_name: r.try_get("full_name")?,
        created_at: r.try_get("created_at")?,
        expires_at: r.try_get("expires_at")?,
        last_active: r.try_get("last_active")?,
        user_agent: r.try_get("user_agent")?,
        ip_address: r.try_get("ip_address")?,
    })
}

fn identity_column(identity: &Identity) -> &'static str {
    match identity {
        Identity::Email(_) => "email",
        Identity::Phone(_) => "phone",
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn push_claim_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ClaimFilter) {
    qb.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND submitted_at >= ").push_bind(from);
    }
    if let Some(to) = filter.date_to {
        qb.push(" AND submitted_at <= ").push_bind(to);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR transaction_code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR full_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

async fn write_subscription<'e>(
    executor: impl PgExecutor<'e>,
    subscription: &UserSubscription,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO user_subscriptions
               (identity, plan_id, amount, activated_at, expires_at, is_active, receipt_number)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           ON CONFLICT (identity)
           DO UPDATE SET
               plan_id = EXCLUDED.plan_id,
               amount = EXCLUDED.amount,
               activated_at = EXCLUDED.activated_at,
               expires_at = EXCLUDED.expires_at,
               is_active = EXCLUDED.is_active,
               receipt_number = EXCLUDED.receipt_number"#,
    )
    .bind(&subscription.identity)
    .bind(&subscription.plan_id)
    .bind(subscription.amount)
    .bind(subscription.activated_at)
    .bind(subscription.expires_at)
    .bind(subscription.is_active)
    .bind(subscription.receipt_number.as_deref())
    .execute(executor)
    .await?;

    Ok(())
}

fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what.to_string()),
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_claim(&self, claim: &PaymentClaim) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO payment_claims
                   (id, full_name, email, phone, transaction_code, plan_id, amount, till_number,
                    submitted_at, expires_at, status, verified_at, game_name, user_agent, ip_address)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(claim.id)
        .bind(&claim.full_name)
        .bind(&claim.email)
        .bind(&claim.phone)
        .bind(&claim.transaction_code)
        .bind(&claim.plan_id)
        .bind(claim.amount)
        .bind(&claim.till_number)
        .bind(claim.submitted_at)
        .bind(claim.expires_at)
        .bind(claim.status.as_str())
        .bind(claim.verified_at)
        .bind(claim.game_name.as_deref())
        .bind(claim.user_agent.as_deref())
        .bind(claim.ip_address.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "transaction_code"))?;

        Ok(())
    }

    async fn get_claim(&self, id: Uuid) -> Result<Option<PaymentClaim>, StoreError> {
        let row = sqlx::query(&format!("SELECT {CLAIM_COLUMNS} FROM payment_claims WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(claim_from_row).transpose()
    }

    async fn find_claim_by_transaction_code(&self, code: &str) -> Result<Option<PaymentClaim>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CLAIM_COLUMNS} FROM payment_claims WHERE transaction_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(claim_from_row).transpose()
    }

    async fn update_claim_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError> {
        let row = sqlx::query(&format!(
            r#"UPDATE payment_claims
               SET status = $2, verified_at = $3
               WHERE id = $1
               RETURNING {CLAIM_COLUMNS}"#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(verified_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(claim_from_row).transpose()
    }

    async fn find_active_claim(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError> {
        let row = sqlx::query(&format!(
            r#"SELECT {CLAIM_COLUMNS} FROM payment_claims
               WHERE {} = $1 AND status = 'active' AND expires_at > $2
               ORDER BY submitted_at DESC
               LIMIT 1"#,
            identity_column(identity)
        ))
        .bind(identity.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(claim_from_row).transpose()
    }

    async fn claims_for_identity(&self, identity: &Identity, limit: usize) -> Result<Vec<PaymentClaim>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {CLAIM_COLUMNS} FROM payment_claims
               WHERE {} = $1
               ORDER BY submitted_at DESC
               LIMIT $2"#,
            identity_column(identity)
        ))
        .bind(identity.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(claim_from_row).collect()
    }

    async fn claims_with_status(
        &self,
        status: PaymentStatus,
        limit: Option<usize>,
    ) -> Result<Vec<PaymentClaim>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"SELECT {CLAIM_COLUMNS} FROM payment_claims
               WHERE status = $1
               ORDER BY submitted_at DESC
               LIMIT $2"#
        ))
        .bind(status.as_str())
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(claim_from_row).collect()
    }

    async fn count_claims(&self, status: Option<PaymentStatus>) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS total FROM payment_claims
               WHERE ($1::text IS NULL OR status = $1)"#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn list_claims(&self, filter: &ClaimFilter) -> Result<(Vec<PaymentClaim>, u64), StoreError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM payment_claims");
        push_claim_filter(&mut count_qb, filter);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut page_qb = QueryBuilder::<Postgres>::new(format!("SELECT {CLAIM_COLUMNS} FROM payment_claims"));
        push_claim_filter(&mut page_qb, filter);
        page_qb
            .push(" ORDER BY submitted_at DESC LIMIT ")
            .push_bind(filter.page_size as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);
        let rows = page_qb.build().fetch_all(&self.pool).await?;

        let items = rows.iter().map(claim_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok((items, total.max(0) as u64))
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO sessions
                   (id, email, phone, full_name, created_at, expires_at, last_active, user_agent, ip_address)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(session.id)
        .bind(&session.email)
        .bind(&session.phone)
        .bind(&session.full_name)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_active)
        .bind(session.user_agent.as_deref())
        .bind(session.ip_address.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn insert_push_request(&self, request: &PushPaymentRequest) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO push_payment_requests
                   (checkout_request_id, merchant_request_id, phone, amount, plan_id, status,
                    initiated_at, resolved_at, receipt_number, transaction_date, failure_reason)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(&request.checkout_request_id)
        .bind(request.merchant_request_id.as_deref())
        .bind(&request.phone)
        .bind(request.amount)
        .bind(&request.plan_id)
        .bind(request.status.as_str())
        .bind(request.initiated_at)
        .bind(request.resolved_at)
        .bind(request.receipt_number.as_deref())
        .bind(request.transaction_date.as_deref())
        .bind(request.failure_reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "checkout_request_id"))?;

        Ok(())
    }

    async fn get_push_request(&self, checkout_request_id: &str) -> Result<Option<PushPaymentRequest>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PUSH_COLUMNS} FROM push_payment_requests WHERE checkout_request_id = $1"
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(push_from_row).transpose()
    }

    async fn resolve_push_request(
        &self,
        checkout_request_id: &str,
        resolution: &PushResolution,
        at: DateTime<Utc>,
    ) -> Result<Option<PushPaymentRequest>, StoreError> {
        let (status, receipt, tx_date, reason) = match resolution {
            PushResolution::Completed {
                receipt_number,
                transaction_date,
            } => (
                PushStatus::Completed,
                receipt_number.as_deref(),
                transaction_date.as_deref(),
                None,
            ),
            PushResolution::Failed { reason } => (PushStatus::Failed, None, None, Some(reason.as_str())),
        };

        let mut tx = self.pool.begin().await?;

        // The status guard makes a repeated callback a no-op.
        let row = sqlx::query(&format!(
            r#"UPDATE push_payment_requests
               SET status = $2, resolved_at = $3, receipt_number = $4,
                   transaction_date = $5, failure_reason = $6
               WHERE checkout_request_id = $1 AND status = 'pending'
               RETURNING {PUSH_COLUMNS}"#
        ))
        .bind(checkout_request_id)
        .bind(status.as_str())
        .bind(at)
        .bind(receipt)
        .bind(tx_date)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let resolved = push_from_row(&row)?;
        if resolved.status == PushStatus::Completed {
            write_subscription(&mut *tx, &resolved.subscription(at)).await?;
        }
        tx.commit().await?;

        Ok(Some(resolved))
    }

    async fn count_push_requests(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM push_payment_requests")
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;
        Ok(total.max(0) as u64)
    }

    async fn upsert_subscription(&self, subscription: &UserSubscription) -> Result<(), StoreError> {
        write_subscription(&self.pool, subscription).await?;
        Ok(())
    }

    async fn get_subscription(&self, identity: &str) -> Result<Option<UserSubscription>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM user_subscriptions WHERE identity = $1"
        ))
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn count_active_subscriptions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS total FROM user_subscriptions WHERE is_active AND expires_at > $1",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;
        Ok(total.max(0) as u64)
    }
}
