// src/api/health.rs

use actix_web::{get, web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::db::PaymentStore;
use crate::error::StoreError;
use crate::models::PaymentStatus;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCounts {
    pub total_claims: u64,
    pub pending_claims: u64,
    pub active_subscriptions: u64,
    pub push_requests: u64,
}

pub async fn counts(store: &dyn PaymentStore, now: DateTime<Utc>) -> Result<HealthCounts, StoreError> {
    Ok(HealthCounts {
        total_claims: store.count_claims(None).await?,
        pending_claims: store.count_claims(Some(PaymentStatus::Pending)).await?,
        active_subscriptions: store.count_active_subscriptions(now).await?,
        push_requests: store.count_push_requests().await?,
    })
}

/// Reports `OK` with a counts snapshot, or `DEGRADED` with 503 when the store
/// cannot be read.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "Service and store are up", body = HealthCounts),
        (status = 503, description = "Store unavailable")
    )
)]
#[get("/api/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let now = Utc::now();
    match counts(state.lifecycle.store().as_ref(), now).await {
        Ok(stats) => HttpResponse::Ok().json(json!({
            "status": "OK",
            "timestamp": now,
            "stats": stats,
            "version": env!("CARGO_PKG_VERSION"),
        })),
        Err(e) => {
            log::error!("health check store failure: {e}");
            HttpResponse::ServiceUnavailable().json(json!({
                "status": "DEGRADED",
                "timestamp": now,
            }))
        }
    }
}
