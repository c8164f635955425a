// src/api/mod.rs

pub mod admin;
pub mod daraja_client;
pub mod health;
pub mod mpesa;
pub mod payments;

use actix_web::error::JsonPayloadError;
use actix_web::{web, HttpRequest};

use crate::error::PaymentError;
use crate::models::ClientMeta;

/// Accepted spellings of the operator header, canonical first.
pub const ADMIN_KEY_HEADERS: [&str; 3] = ["x-admin-key", "admin-key", "adminkey"];

/// Operator secret from whichever accepted header carries it.
pub fn admin_key(req: &HttpRequest) -> Option<&str> {
    ADMIN_KEY_HEADERS
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|v| v.to_str().ok())
}

pub fn client_meta(req: &HttpRequest) -> ClientMeta {
    ClientMeta {
        user_agent: req
            .headers()
            .get(actix_web::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ip_address: req.connection_info().realip_remote_addr().map(str::to_string),
    }
}

/// Rejected JSON bodies get the same `{"success":false,...}` envelope as
/// every other validation error.
fn json_error(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::warn!("rejected json body on {}: {err}", req.path());
    PaymentError::InvalidBody(err.to_string()).into()
}

/// Every route. `admin/stats` has to be registered ahead of `admin/{id}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .service(payments::submit_payment)
        .service(payments::subscription_status)
        .service(payments::payment_history)
        .service(payments::session_status)
        .service(payments::verify_payment)
        .service(admin::payment_stats)
        .service(admin::pending_payments)
        .service(admin::list_payments)
        .service(admin::payment_by_id)
        .service(mpesa::initiate_payment)
        .service(mpesa::payment_callback)
        .service(mpesa::payment_status)
        .service(mpesa::user_status)
        .service(health::health);
}
