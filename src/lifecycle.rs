// src/lifecycle.rs

//! Till-claim lifecycle: `pending -> active | rejected`, with `active`
//! turning into `expired` lazily once `expires_at` passes.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::PaymentStore;
use crate::error::{PaymentError, StoreError};
use crate::models::{
    days_remaining, ActiveSubscription, ClaimFilter, ClaimPage, ClientMeta, Identity, PaymentClaim,
    PaymentStats, PaymentStatus, Session, SessionCheck, SubscriptionStatus, UserSubscription,
};
use crate::notify::{notify_best_effort, Notifier};
use crate::{phone, plans, stats};

pub const HISTORY_LIMIT: usize = 100;
pub const PENDING_LIMIT: usize = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Body of a till claim. Every field is optional on the wire so that missing
/// ones can be reported by name.
#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSubmission {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub transaction_code: Option<String>,
    #[serde(alias = "planType")]
    pub plan_id: Option<String>,
    /// Ignored; the catalog price is always used.
    #[schema(value_type = Option<i64>)]
    pub amount: Option<serde_json::Value>,
    pub game_name: Option<String>,
}

/// What a successful submit hands back. The session is best-effort, so its
/// id may be absent.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub claim: PaymentClaim,
    pub session_id: Option<Uuid>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub struct PaymentLifecycle {
    store: Arc<dyn PaymentStore>,
    notifier: Arc<dyn Notifier>,
    operator_secret: String,
    till_number: String,
}

impl PaymentLifecycle {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        notifier: Arc<dyn Notifier>,
        operator_secret: impl Into<String>,
        till_number: impl Into<String>,
    ) -> Self {
        PaymentLifecycle {
            store,
            notifier,
            operator_secret: operator_secret.into(),
            till_number: till_number.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    /// Constant-time check of the operator secret. Runs before any lookup so
    /// an unauthenticated caller learns nothing about claim existence.
    pub fn authorize(&self, proof: Option<&str>) -> Result<(), PaymentError> {
        let Some(proof) = proof.filter(|p| !p.is_empty()) else {
            log::warn!("operator request without admin key");
            return Err(PaymentError::Unauthorized);
        };
        if self.operator_secret.is_empty() {
            return Err(PaymentError::Unauthorized);
        }
        if bool::from(proof.as_bytes().ct_eq(self.operator_secret.as_bytes())) {
            Ok(())
        } else {
            log::warn!("operator request with invalid admin key");
            Err(PaymentError::Unauthorized)
        }
    }

    pub async fn submit(&self, input: ClaimSubmission, meta: ClientMeta) -> Result<SubmitReceipt, PaymentError> {
        let fields = [
            ("fullName", present(&input.full_name)),
            ("email", present(&input.email)),
            ("phone", present(&input.phone)),
            ("transactionCode", present(&input.transaction_code)),
            ("planId", present(&input.plan_id)),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(PaymentError::MissingFields(missing.join(", ")));
        }
        let [full_name, email, raw_phone, transaction_code, plan_id] = fields.map(|(_, v)| v.unwrap_or_default());

        let plan = plans::lookup(plan_id)?;
        let phone = phone::normalize(raw_phone)?;
        let transaction_code = transaction_code.to_uppercase();
        let email = email.to_lowercase();

        if self
            .store
            .find_claim_by_transaction_code(&transaction_code)
            .await?
            .is_some()
        {
            log::warn!("duplicate transaction code submitted code={transaction_code} email={email}");
            return Err(PaymentError::DuplicateTransactionCode);
        }

        if let Some(sent) = input.amount.as_ref().and_then(|v| v.as_i64()) {
            if sent != plan.amount {
                log::warn!(
                    "client amount {sent} ignored for plan {}, using {}",
                    plan.id,
                    plan.amount
                );
            }
        }

        let now = Utc::now();
        let claim = PaymentClaim {
            id: Uuid::new_v4(),
            full_name: full_name.to_string(),
            email,
            phone,
            transaction_code,
            plan_id: plan.id.to_string(),
            amount: plan.amount,
            till_number: self.till_number.clone(),
            submitted_at: now,
            expires_at: plan.expiry_from(now),
            status: PaymentStatus::Pending,
            verified_at: None,
            game_name: present(&input.game_name).map(str::to_string),
            user_agent: meta.user_agent.clone(),
            ip_address: meta.ip_address.clone(),
        };

        match self.store.insert_claim(&claim).await {
            Ok(()) => {}
            // Lost the race against a concurrent submit with the same code.
            Err(StoreError::Conflict(_)) => return Err(PaymentError::DuplicateTransactionCode),
            Err(e) => return Err(e.into()),
        }
        log::info!(
            "payment claim saved id={} email={} plan={} code={}",
            claim.id,
            claim.email,
            claim.plan_id,
            claim.transaction_code
        );

        let session = Session::new(&claim.email, &claim.phone, &claim.full_name, &meta, now);
        let session_id = match self.store.insert_session(&session).await {
            Ok(()) => Some(session.id),
            Err(e) => {
                log::warn!("session create failed for claim {}, continuing: {e}", claim.id);
                None
            }
        };

        let notifier = Arc::clone(&self.notifier);
        let mail_claim = claim.clone();
        tokio::spawn(async move {
            notify_best_effort(
                "payment received",
                &mail_claim.email,
                notifier.payment_received(&mail_claim, &plan),
            )
            .await;
        });

        Ok(SubmitReceipt { claim, session_id })
    }

    pub async fn check_active_subscription(&self, identity: &str) -> Result<SubscriptionStatus, PaymentError> {
        if identity.trim().is_empty() {
            return Err(PaymentError::MissingField("email"));
        }
        let identity = Identity::parse(identity);
        let now = Utc::now();

        let Some(claim) = self.store.find_active_claim(&identity, now).await? else {
            return Ok(SubscriptionStatus {
                is_active: false,
                subscription: None,
            });
        };

        let plan_name = plans::lookup(&claim.plan_id)
            .map(|p| p.name.to_string())
            .unwrap_or_else(|_| claim.plan_id.clone());

        Ok(SubscriptionStatus {
            is_active: true,
            subscription: Some(ActiveSubscription {
                claim_id: claim.id,
                days_remaining: days_remaining(claim.expires_at, now),
                email: claim.email,
                phone: claim.phone,
                plan_id: claim.plan_id,
                plan_name,
                amount: claim.amount,
                paid_at: claim.submitted_at,
                expires_at: claim.expires_at,
            }),
        })
    }

    /// Newest first, with lazy expiry applied to each status.
    pub async fn history(&self, identity: &str) -> Result<Vec<PaymentClaim>, PaymentError> {
        if identity.trim().is_empty() {
            return Err(PaymentError::MissingField("email"));
        }
        let identity = Identity::parse(identity);
        let now = Utc::now();

        let mut claims = self.store.claims_for_identity(&identity, HISTORY_LIMIT).await?;
        for claim in &mut claims {
            claim.status = claim.effective_status(now);
        }
        Ok(claims)
    }

    pub async fn verify(
        &self,
        claim_id: Option<&str>,
        target_status: Option<&str>,
        auth_proof: Option<&str>,
    ) -> Result<PaymentClaim, PaymentError> {
        self.authorize(auth_proof)?;

        let claim_id = claim_id.map(str::trim).filter(|v| !v.is_empty());
        let target_status = target_status.map(str::trim).filter(|v| !v.is_empty());
        let (Some(claim_id), Some(target_status)) = (claim_id, target_status) else {
            return Err(PaymentError::MissingFields("paymentId, status".to_string()));
        };

        let status: PaymentStatus = target_status
            .to_lowercase()
            .parse()
            .map_err(PaymentError::InvalidStatus)?;
        let id = Uuid::parse_str(claim_id).map_err(|_| PaymentError::NotFound("Payment"))?;

        let now = Utc::now();
        let claim = self
            .store
            .update_claim_status(id, status, now)
            .await?
            .ok_or(PaymentError::NotFound("Payment"))?;
        log::info!("payment {} set to {}", claim.id, claim.status);

        if status == PaymentStatus::Active {
            self.on_activated(&claim, now).await;
        }

        Ok(claim)
    }

    /// Side effects of activation. The claim is already persisted as active,
    /// so nothing here can fail the call.
    async fn on_activated(&self, claim: &PaymentClaim, now: chrono::DateTime<Utc>) {
        let subscription = UserSubscription {
            identity: claim.email.clone(),
            plan_id: claim.plan_id.clone(),
            amount: claim.amount,
            activated_at: now,
            expires_at: claim.expires_at,
            is_active: true,
            receipt_number: Some(claim.transaction_code.clone()),
        };
        if let Err(e) = self.activate_subscription(&subscription).await {
            log::error!("subscription view update failed for claim {}: {e}", claim.id);
        }

        let Ok(plan) = plans::lookup(&claim.plan_id) else {
            log::warn!("activation email skipped, unknown plan {} on claim {}", claim.plan_id, claim.id);
            return;
        };
        let notifier = Arc::clone(&self.notifier);
        let mail_claim = claim.clone();
        tokio::spawn(async move {
            notify_best_effort(
                "activation",
                &mail_claim.email,
                notifier.subscription_activated(&mail_claim, &plan),
            )
            .await;
        });
    }

    /// Writes the subscription view for a till claim, overwriting whatever the
    /// identity had before. Push activations are written by the store together
    /// with the request resolution.
    pub async fn activate_subscription(&self, subscription: &UserSubscription) -> Result<(), PaymentError> {
        self.store.upsert_subscription(subscription).await?;
        log::info!(
            "subscription active identity={} plan={} expires_at={}",
            subscription.identity,
            subscription.plan_id,
            subscription.expires_at
        );
        Ok(())
    }

    pub async fn stats(&self) -> Result<PaymentStats, PaymentError> {
        Ok(stats::collect(self.store.as_ref(), Utc::now()).await?)
    }

    pub async fn list_all(&self, mut filter: ClaimFilter) -> Result<ClaimPage, PaymentError> {
        filter.page = filter.page.max(1);
        filter.page_size = filter.page_size.clamp(1, MAX_PAGE_SIZE);

        let (items, total) = self.store.list_claims(&filter).await?;
        let page_size = u64::from(filter.page_size);
        Ok(ClaimPage {
            items,
            total,
            page: filter.page,
            page_size: filter.page_size,
            page_count: total.div_ceil(page_size),
        })
    }

    pub async fn get_claim(&self, claim_id: &str, auth_proof: Option<&str>) -> Result<PaymentClaim, PaymentError> {
        self.authorize(auth_proof)?;
        let id = Uuid::parse_str(claim_id.trim()).map_err(|_| PaymentError::NotFound("Payment"))?;
        self.store
            .get_claim(id)
            .await?
            .ok_or(PaymentError::NotFound("Payment"))
    }

    pub async fn pending(&self, limit: usize) -> Result<Vec<PaymentClaim>, PaymentError> {
        Ok(self
            .store
            .claims_with_status(PaymentStatus::Pending, Some(limit))
            .await?)
    }

    pub async fn validate_session(&self, session_id: &str) -> Result<SessionCheck, PaymentError> {
        let Ok(id) = Uuid::parse_str(session_id.trim()) else {
            return Ok(SessionCheck::NotFound);
        };
        match self.store.get_session(id).await? {
            None => Ok(SessionCheck::NotFound),
            Some(session) if session.expires_at < Utc::now() => Ok(SessionCheck::Expired),
            Some(session) => Ok(SessionCheck::Valid(session)),
        }
    }
}
