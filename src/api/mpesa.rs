// src/api/mpesa.rs

use actix_web::{get, post, web, HttpResponse};
use serde_json::json;

use crate::error::PaymentError;
use crate::models::PushPaymentRequest;
use crate::push::{PushInitiation, PushStarted, PushUserStatus};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/api/initiate-payment",
    tag = "mpesa",
    request_body = PushInitiation,
    responses(
        (status = 200, description = "STK push sent to the handset", body = PushStarted),
        (status = 400, description = "Missing field, invalid phone or amount below minimum"),
        (status = 500, description = "Daraja rejected the request")
    )
)]
#[post("/api/initiate-payment")]
pub async fn initiate_payment(
    state: web::Data<AppState>,
    payload: web::Json<PushInitiation>,
) -> Result<HttpResponse, PaymentError> {
    let started = state.gateway.initiate(payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "checkoutRequestID": started.checkout_request_id,
        "merchantRequestID": started.merchant_request_id,
        "responseDescription": started.response_description,
        "customerMessage": started.customer_message,
    })))
}

/// Daraja result callback. The body is taken raw so that payloads which do
/// not decode are still acknowledged.
#[utoipa::path(
    post,
    path = "/api/payment-callback",
    tag = "mpesa",
    responses((status = 200, description = "Always acknowledged"))
)]
#[post("/api/payment-callback")]
pub async fn payment_callback(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let outcome = state.gateway.resolve(&body).await;
    log::debug!("stk callback outcome: {outcome:?}");
    HttpResponse::Ok().json(json!({ "ResultCode": 0, "ResultDesc": "Success" }))
}

#[utoipa::path(
    get,
    path = "/api/payment-status/{checkout_request_id}",
    tag = "mpesa",
    params(("checkout_request_id" = String, Path, description = "CheckoutRequestID from initiation")),
    responses(
        (status = 200, description = "Push request", body = PushPaymentRequest),
        (status = 404, description = "Unknown checkout request")
    )
)]
#[get("/api/payment-status/{checkout_request_id}")]
pub async fn payment_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, PaymentError> {
    let payment = state.gateway.query_status(&path).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "status": payment.status,
        "payment": payment,
    })))
}

#[utoipa::path(
    get,
    path = "/api/user-status/{phone}",
    tag = "mpesa",
    params(("phone" = String, Path, description = "Phone number used for the push")),
    responses((status = 200, description = "Push subscription state", body = PushUserStatus))
)]
#[get("/api/user-status/{phone}")]
pub async fn user_status(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, PaymentError> {
    let user = state.gateway.user_status(&path).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "user": user,
    })))
}
