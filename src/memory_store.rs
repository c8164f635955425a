// src/memory_store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::PaymentStore;
use crate::error::StoreError;
use crate::models::{
    ClaimFilter, Identity, PaymentClaim, PaymentStatus, PushPaymentRequest, PushResolution, PushStatus,
    Session, UserSubscription,
};

/// Process-local [`PaymentStore`]. Used when no `DATABASE_URL` is configured
/// and as the test fixture.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Insertion order.
    claims: Vec<PaymentClaim>,
    sessions: HashMap<Uuid, Session>,
    push_requests: HashMap<String, PushPaymentRequest>,
    subscriptions: HashMap<String, UserSubscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    /// Newest first; ties keep the later insert in front.
    fn newest_first<'a>(&'a self, keep: impl Fn(&PaymentClaim) -> bool) -> Vec<&'a PaymentClaim> {
        let mut out: Vec<&PaymentClaim> = self.claims.iter().rev().filter(|c| keep(*c)).collect();
        out.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        out
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_claim(&self, claim: &PaymentClaim) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner
            .claims
            .iter()
            .any(|c| c.transaction_code == claim.transaction_code)
        {
            return Err(StoreError::Conflict("transaction_code".to_string()));
        }
        inner.claims.push(claim.clone());
        Ok(())
    }

    async fn get_claim(&self, id: Uuid) -> Result<Option<PaymentClaim>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.claims.iter().find(|c| c.id == id).cloned())
    }

    async fn find_claim_by_transaction_code(&self, code: &str) -> Result<Option<PaymentClaim>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .claims
            .iter()
            .find(|c| c.transaction_code == code)
            .cloned())
    }

    async fn update_claim_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.claims.iter_mut().find(|c| c.id == id).map(|c| {
            c.status = status;
            c.verified_at = Some(verified_at);
            c.clone()
        }))
    }

    async fn find_active_claim(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .newest_first(|c| identity.matches(c) && c.grants_access_at(now))
            .first()
            .map(|c| (*c).clone()))
    }

    async fn claims_for_identity(&self, identity: &Identity, limit: usize) -> Result<Vec<PaymentClaim>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .newest_first(|c| identity.matches(c))
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claims_with_status(
        &self,
        status: PaymentStatus,
        limit: Option<usize>,
    ) -> Result<Vec<PaymentClaim>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .newest_first(|c| c.status == status)
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count_claims(&self, status: Option<PaymentStatus>) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .claims
            .iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .count() as u64)
    }

    async fn list_claims(&self, filter: &ClaimFilter) -> Result<(Vec<PaymentClaim>, u64), StoreError> {
        let inner = self.inner.read().await;
        let matching = inner.newest_first(|c| filter.matches(c));
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(filter.offset())
            .take(filter.page_size as usize)
            .cloned()
            .collect();
        Ok((items, total))
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn insert_push_request(&self, request: &PushPaymentRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.push_requests.contains_key(&request.checkout_request_id) {
            return Err(StoreError::Conflict("checkout_request_id".to_string()));
        }
        inner
            .push_requests
            .insert(request.checkout_request_id.clone(), request.clone());
        Ok(())
    }

    async fn get_push_request(&self, checkout_request_id: &str) -> Result<Option<PushPaymentRequest>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .push_requests
            .get(checkout_request_id)
            .cloned())
    }

    async fn resolve_push_request(
        &self,
        checkout_request_id: &str,
        resolution: &PushResolution,
        at: DateTime<Utc>,
    ) -> Result<Option<PushPaymentRequest>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(request) = inner.push_requests.get_mut(checkout_request_id) else {
            return Ok(None);
        };
        if request.status != PushStatus::Pending {
            return Ok(None);
        }

        request.resolved_at = Some(at);
        match resolution {
            PushResolution::Completed {
                receipt_number,
                transaction_date,
            } => {
                request.status = PushStatus::Completed;
                request.receipt_number = receipt_number.clone();
                request.transaction_date = transaction_date.clone();
            }
            PushResolution::Failed { reason } => {
                request.status = PushStatus::Failed;
                request.failure_reason = Some(reason.clone());
            }
        }
        let resolved = request.clone();
        if resolved.status == PushStatus::Completed {
            let subscription = resolved.subscription(at);
            inner.subscriptions.insert(subscription.identity.clone(), subscription);
        }
        Ok(Some(resolved))
    }

    async fn count_push_requests(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().await.push_requests.len() as u64)
    }

    async fn upsert_subscription(&self, subscription: &UserSubscription) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .subscriptions
            .insert(subscription.identity.clone(), subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, identity: &str) -> Result<Option<UserSubscription>, StoreError> {
        Ok(self.inner.read().await.subscriptions.get(identity).cloned())
    }

    async fn count_active_subscriptions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| s.is_active_at(now))
            .count() as u64)
    }
}
