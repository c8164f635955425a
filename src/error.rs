// src/error.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A unique index rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Missing required fields: {0}")]
    MissingFields(String),

    #[error("Invalid plan type: {0}")]
    InvalidPlan(String),

    #[error("Invalid phone number. Please use format: 07XX XXX XXX")]
    InvalidPhone,

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// JSON body that does not fit the request type.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Minimum payment amount is {minimum} KSh")]
    AmountTooLow { minimum: i64 },

    #[error("This transaction code has already been used")]
    DuplicateTransactionCode,

    #[error("Unauthorized: Invalid admin key")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Message is already safe to show the caller.
    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResponseError for PaymentError {
    fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::MissingField(_)
            | PaymentError::MissingFields(_)
            | PaymentError::InvalidPlan(_)
            | PaymentError::InvalidPhone
            | PaymentError::InvalidStatus(_)
            | PaymentError::InvalidDate(_)
            | PaymentError::InvalidBody(_)
            | PaymentError::AmountTooLow { .. }
            | PaymentError::DuplicateTransactionCode => StatusCode::BAD_REQUEST,
            PaymentError::Unauthorized => StatusCode::UNAUTHORIZED,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::Upstream(_) | PaymentError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            PaymentError::Store(e) => {
                log::error!("store failure: {e}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(PaymentError::InvalidPhone.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            PaymentError::DuplicateTransactionCode.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PaymentError::InvalidBody("expected i64".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(PaymentError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(PaymentError::NotFound("Payment").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            PaymentError::Upstream("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn store_detail_is_not_exposed() {
        let err = PaymentError::Store(StoreError::Corrupt("status=bogus".into()));
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn messages_name_the_field() {
        assert_eq!(PaymentError::MissingField("email").to_string(), "email is required");
        assert_eq!(
            PaymentError::AmountTooLow { minimum: 10 }.to_string(),
            "Minimum payment amount is 10 KSh"
        );
    }
}
