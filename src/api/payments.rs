// src/api/payments.rs

use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::api::{admin_key, client_meta};
use crate::error::PaymentError;
use crate::lifecycle::ClaimSubmission;
use crate::models::{PaymentClaim, SessionCheck, SubscriptionStatus};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(alias = "claimId")]
    pub payment_id: Option<String>,
    pub status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/payments/submit",
    tag = "payments",
    request_body = ClaimSubmission,
    responses(
        (status = 200, description = "Claim recorded as pending"),
        (status = 400, description = "Missing field, invalid plan or phone, or duplicate transaction code"),
        (status = 500, description = "Server error")
    )
)]
#[post("/api/payments/submit")]
pub async fn submit_payment(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<ClaimSubmission>,
) -> Result<HttpResponse, PaymentError> {
    let receipt = state
        .lifecycle
        .submit(payload.into_inner(), client_meta(&req))
        .await?;
    let claim = receipt.claim;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Payment submitted successfully",
        "paymentId": claim.id,
        "sessionId": receipt.session_id,
        "data": {
            "email": claim.email,
            "phone": claim.phone,
            "planId": claim.plan_id,
            "amount": claim.amount,
            "transactionCode": claim.transaction_code,
            "status": claim.status,
            "expiresAt": claim.expires_at,
        },
    })))
}

#[utoipa::path(
    get,
    path = "/api/payments/status/{identity}",
    tag = "payments",
    params(("identity" = String, Path, description = "Email or phone number")),
    responses((status = 200, description = "Subscription status", body = SubscriptionStatus))
)]
#[get("/api/payments/status/{identity}")]
pub async fn subscription_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, PaymentError> {
    let status = state.lifecycle.check_active_subscription(&path).await?;
    if !status.is_active {
        return Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "isActive": false,
            "message": "No active subscription found",
        })));
    }
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "isActive": true,
        "subscription": status.subscription,
    })))
}

#[utoipa::path(
    get,
    path = "/api/payments/history/{identity}",
    tag = "payments",
    params(("identity" = String, Path, description = "Email or phone number")),
    responses((status = 200, description = "Claims, newest first"))
)]
#[get("/api/payments/history/{identity}")]
pub async fn payment_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, PaymentError> {
    let payments = state.lifecycle.history(&path).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "payments": payments,
    })))
}

#[utoipa::path(
    get,
    path = "/api/payments/session/{id}",
    tag = "payments",
    params(("id" = String, Path, description = "Session id returned by submit")),
    responses(
        (status = 200, description = "Session is valid"),
        (status = 401, description = "Session expired"),
        (status = 404, description = "Unknown session")
    )
)]
#[get("/api/payments/session/{id}")]
pub async fn session_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, PaymentError> {
    Ok(match state.lifecycle.validate_session(&path).await? {
        SessionCheck::Valid(session) => HttpResponse::Ok().json(json!({
            "success": true,
            "valid": true,
            "session": session,
        })),
        SessionCheck::Expired => HttpResponse::Unauthorized().json(json!({
            "success": false,
            "valid": false,
            "message": "Session expired",
        })),
        SessionCheck::NotFound => HttpResponse::NotFound().json(json!({
            "success": false,
            "valid": false,
            "message": "Session not found",
        })),
    })
}

#[utoipa::path(
    post,
    path = "/api/payments/verify",
    tag = "admin",
    request_body = VerifyRequest,
    params(("X-Admin-Key" = String, Header, description = "Operator secret")),
    responses(
        (status = 200, description = "Claim updated", body = PaymentClaim),
        (status = 400, description = "Missing fields or invalid status"),
        (status = 401, description = "Missing or wrong operator secret"),
        (status = 404, description = "Unknown claim")
    )
)]
#[post("/api/payments/verify")]
pub async fn verify_payment(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Json<VerifyRequest>,
) -> Result<HttpResponse, PaymentError> {
    let claim = state
        .lifecycle
        .verify(
            payload.payment_id.as_deref(),
            payload.status.as_deref(),
            admin_key(&req),
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("Payment {} successfully", claim.status),
        "payment": claim,
    })))
}
