// src/api/daraja_client.rs
//
// Minimal client for the Safaricom Daraja API: OAuth client-credentials token
// plus Lipa na M-Pesa Online (STK push).

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DarajaConfig;

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

pub const ACCOUNT_REFERENCE: &str = "TILLPAY_SUB";

pub const ERR_INVALID_CALLBACK: &str = "400.002.02";
pub const ERR_INVALID_CREDENTIALS: &str = "400.002.01";

#[derive(Debug, Error)]
pub enum DarajaError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("daraja api error status={status}")]
    Api {
        status: u16,
        error_code: Option<String>,
        error_message: Option<String>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DarajaError {
    /// Caller-facing text. Known upstream codes get a specific message;
    /// nothing from the request (keys, passwords) ever ends up here.
    pub fn public_message(&self) -> String {
        match self {
            DarajaError::Api {
                error_code: Some(code),
                ..
            } if code == ERR_INVALID_CALLBACK => "Invalid callback URL configuration".to_string(),
            DarajaError::Api {
                error_code: Some(code),
                ..
            } if code == ERR_INVALID_CREDENTIALS => "Invalid business short code or passkey".to_string(),
            DarajaError::Api {
                error_message: Some(msg),
                ..
            } if !msg.trim().is_empty() => msg.clone(),
            _ => "Payment initiation failed".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: &'static str,
    pub amount: i64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub response_code: Option<String>,
    pub response_description: Option<String>,
    pub customer_message: Option<String>,
}

/// `YYYYMMDDHHMMSS`.
pub fn stk_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// `base64(shortCode + passkey + timestamp)`.
pub fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{short_code}{passkey}{timestamp}"))
}

pub struct DarajaClient {
    http: reqwest::Client,
    config: DarajaConfig,
}

impl DarajaClient {
    pub fn new(config: DarajaConfig) -> Result<Self, DarajaError> {
        let http = reqwest::Client::builder().timeout(PUSH_TIMEOUT).build()?;
        Ok(DarajaClient { http, config })
    }

    pub fn callback_url(&self) -> String {
        format!("{}/api/payment-callback", self.config.callback_base_url)
    }

    /// Fresh token per call; nothing is cached across requests.
    async fn access_token(&self) -> Result<String, DarajaError> {
        let resp = self
            .http
            .get(format!("{}/oauth/v1/generate", self.config.base_url))
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            log::error!("daraja token request failed status={}", status.as_u16());
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str::<TokenResponse>(&body)
            .map(|t| t.access_token)
            .map_err(|e| DarajaError::InvalidResponse(format!("token: {e}")))
    }

    pub async fn stk_push(
        &self,
        phone: &str,
        amount: i64,
        description: &str,
    ) -> Result<StkPushResponse, DarajaError> {
        let token = self.access_token().await?;
        let timestamp = stk_timestamp(Utc::now());
        let password = stk_password(&self.config.business_short_code, &self.config.passkey, &timestamp);

        let req = StkPushRequest {
            business_short_code: self.config.business_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount,
            party_a: phone.to_string(),
            party_b: self.config.business_short_code.clone(),
            phone_number: phone.to_string(),
            callback_url: self.callback_url(),
            account_reference: ACCOUNT_REFERENCE.to_string(),
            transaction_desc: description.to_string(),
        };

        let resp = self
            .http
            .post(format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url))
            .bearer_auth(token)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str::<StkPushResponse>(&body)
            .map_err(|e| DarajaError::InvalidResponse(format!("{e}; body={body}")))
    }
}

fn api_error(status: u16, body: &str) -> DarajaError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
    DarajaError::Api {
        status,
        error_code: parsed.as_ref().and_then(|b| b.error_code.clone()),
        error_message: parsed.and_then(|b| b.error_message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(stk_timestamp(at), "20240307090501");
    }

    #[test]
    fn password_is_base64_of_concatenation() {
        let pw = stk_password("174379", "passkey", "20240307090501");
        let decoded = STANDARD.decode(pw).unwrap();
        assert_eq!(decoded, b"174379passkey20240307090501");
    }

    #[test]
    fn known_error_codes_are_mapped() {
        let e = api_error(400, r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid CallBackURL"}"#);
        assert_eq!(e.public_message(), "Invalid callback URL configuration");
        let e = api_error(400, r#"{"errorCode":"400.002.01","errorMessage":"Invalid Access Token"}"#);
        assert_eq!(e.public_message(), "Invalid business short code or passkey");
    }

    #[test]
    fn unknown_errors_fall_back() {
        let e = api_error(500, r#"{"errorCode":"500.001.1001","errorMessage":"Unable to lock subscriber"}"#);
        assert_eq!(e.public_message(), "Unable to lock subscriber");
        let e = api_error(502, "<html>bad gateway</html>");
        assert_eq!(e.public_message(), "Payment initiation failed");
        assert_eq!(DarajaError::InvalidResponse("x".into()).public_message(), "Payment initiation failed");
    }

    #[test]
    fn push_request_uses_daraja_field_names() {
        let req = StkPushRequest {
            business_short_code: "174379".into(),
            password: "pw".into(),
            timestamp: "20240307090501".into(),
            transaction_type: "CustomerPayBillOnline",
            amount: 299,
            party_a: "254711000111".into(),
            party_b: "174379".into(),
            phone_number: "254711000111".into(),
            callback_url: "https://cb.example.com/api/payment-callback".into(),
            account_reference: ACCOUNT_REFERENCE.into(),
            transaction_desc: "Subscription - monthly".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["BusinessShortCode"], "174379");
        assert_eq!(v["PartyA"], "254711000111");
        assert_eq!(v["CallBackURL"], "https://cb.example.com/api/payment-callback");
        assert_eq!(v["Amount"], 299);
        assert_eq!(v["TransactionType"], "CustomerPayBillOnline");
    }
}
