// src/push.rs

//! STK push flow: initiate against Daraja, persist the pending request under
//! the gateway's checkout id, and resolve it once from the async callback.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::daraja_client::DarajaClient;
use crate::db::PaymentStore;
use crate::error::PaymentError;
use crate::lifecycle::PaymentLifecycle;
use crate::models::{days_remaining, PushPaymentRequest, PushResolution, PushStatus, UserSubscription};
use crate::phone;

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushInitiation {
    #[serde(alias = "phoneNumber")]
    pub phone: Option<String>,
    pub amount: Option<i64>,
    #[serde(alias = "planType")]
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushStarted {
    pub checkout_request_id: String,
    pub merchant_request_id: Option<String>,
    pub response_description: Option<String>,
    pub customer_message: Option<String>,
}

/// Daraja's callback envelope: `{"Body": {"stkCallback": {...}}}`.
#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: Option<String>,
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    /// Metadata values arrive as strings or numbers depending on the item.
    pub fn metadata(&self, name: &str) -> Option<String> {
        let item = self
            .callback_metadata
            .as_ref()?
            .items
            .iter()
            .find(|i| i.name == name)?;
        match item.value.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn resolution(&self) -> PushResolution {
        if self.result_code == 0 {
            PushResolution::Completed {
                receipt_number: self.metadata("MpesaReceiptNumber"),
                transaction_date: self.metadata("TransactionDate"),
            }
        } else {
            PushResolution::Failed {
                reason: self
                    .result_desc
                    .clone()
                    .unwrap_or_else(|| format!("result code {}", self.result_code)),
            }
        }
    }
}

/// What happened to a callback. The HTTP layer acknowledges all of them.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Completed(PushPaymentRequest),
    Failed(PushPaymentRequest),
    AlreadyResolved,
    Unknown,
    Malformed,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushUserStatus {
    pub phone: String,
    pub subscription: Option<UserSubscription>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: i64,
}

pub struct PushPaymentGateway {
    lifecycle: Arc<PaymentLifecycle>,
    client: Option<DarajaClient>,
    min_amount: i64,
}

impl PushPaymentGateway {
    pub fn new(lifecycle: Arc<PaymentLifecycle>, client: Option<DarajaClient>, min_amount: i64) -> Self {
        PushPaymentGateway {
            lifecycle,
            client,
            min_amount,
        }
    }

    fn store(&self) -> &Arc<dyn PaymentStore> {
        self.lifecycle.store()
    }

    pub async fn initiate(&self, input: PushInitiation) -> Result<PushStarted, PaymentError> {
        let raw_phone = input.phone.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let plan_id = input.plan_id.as_deref().map(str::trim).filter(|v| !v.is_empty());
        let (Some(raw_phone), Some(amount), Some(plan_id)) = (raw_phone, input.amount, plan_id) else {
            return Err(PaymentError::MissingFields("phone, amount, planId".to_string()));
        };

        if !phone::is_valid_push_phone(raw_phone) {
            return Err(PaymentError::InvalidPhone);
        }
        if amount < self.min_amount {
            return Err(PaymentError::AmountTooLow {
                minimum: self.min_amount,
            });
        }
        let Some(client) = self.client.as_ref() else {
            log::error!("push initiation requested but Daraja credentials are not configured");
            return Err(PaymentError::Upstream("push payments are not configured".to_string()));
        };

        let phone: String = raw_phone.chars().filter(|c| c.is_ascii_digit()).collect();
        log::info!("initiating stk push phone={phone} amount={amount} plan={plan_id}");

        let description = format!("Subscription - {plan_id}");
        let response = client.stk_push(&phone, amount, &description).await.map_err(|e| {
            log::error!("stk push failed phone={phone}: {e:?}");
            PaymentError::Upstream(e.public_message())
        })?;

        let request = PushPaymentRequest {
            checkout_request_id: response.checkout_request_id.clone(),
            merchant_request_id: response.merchant_request_id.clone(),
            phone,
            amount,
            plan_id: plan_id.to_string(),
            status: PushStatus::Pending,
            initiated_at: Utc::now(),
            resolved_at: None,
            receipt_number: None,
            transaction_date: None,
            failure_reason: None,
        };
        if let Err(e) = self.store().insert_push_request(&request).await {
            // The handset has already been prompted.
            log::error!(
                "stk push sent but not recorded checkout_request_id={} merchant_request_id={} phone={} amount={} plan={}: {e}",
                request.checkout_request_id,
                request.merchant_request_id.as_deref().unwrap_or_default(),
                request.phone,
                request.amount,
                request.plan_id
            );
            return Err(e.into());
        }
        log::info!("stk push pending checkout_request_id={}", request.checkout_request_id);

        Ok(PushStarted {
            checkout_request_id: response.checkout_request_id,
            merchant_request_id: response.merchant_request_id,
            response_description: response.response_description,
            customer_message: response.customer_message,
        })
    }

    /// Never fails. Malformed payloads, unknown ids, repeats and store errors
    /// are logged and reported through the outcome only. A store error leaves
    /// the request pending, so Daraja's retry can still complete it.
    pub async fn resolve(&self, payload: &[u8]) -> CallbackOutcome {
        let envelope = match serde_json::from_slice::<CallbackEnvelope>(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("ignoring malformed stk callback: {e}");
                return CallbackOutcome::Malformed;
            }
        };
        let callback = envelope.body.stk_callback;
        let id = callback.checkout_request_id.as_str();
        log::info!("stk callback checkout_request_id={id} result_code={}", callback.result_code);

        let now = Utc::now();
        let resolved = match self.store().resolve_push_request(id, &callback.resolution(), now).await {
            Ok(Some(request)) => request,
            Ok(None) => return self.unresolved(id).await,
            Err(e) => {
                log::error!("stk callback store failure checkout_request_id={id}: {e}");
                return CallbackOutcome::Unknown;
            }
        };

        if resolved.status == PushStatus::Failed {
            log::info!(
                "stk push failed checkout_request_id={id} reason={}",
                resolved.failure_reason.as_deref().unwrap_or_default()
            );
            return CallbackOutcome::Failed(resolved);
        }

        log::info!(
            "stk push completed checkout_request_id={id} phone={} plan={} receipt={}",
            resolved.phone,
            resolved.plan_id,
            resolved.receipt_number.as_deref().unwrap_or_default()
        );
        CallbackOutcome::Completed(resolved)
    }

    async fn unresolved(&self, id: &str) -> CallbackOutcome {
        match self.store().get_push_request(id).await {
            Ok(Some(_)) => {
                log::info!("repeat stk callback ignored checkout_request_id={id}");
                CallbackOutcome::AlreadyResolved
            }
            Ok(None) => {
                log::warn!("stk callback for unknown checkout_request_id={id}");
                CallbackOutcome::Unknown
            }
            Err(e) => {
                log::error!("stk callback lookup failed checkout_request_id={id}: {e}");
                CallbackOutcome::Unknown
            }
        }
    }

    pub async fn query_status(&self, checkout_request_id: &str) -> Result<PushPaymentRequest, PaymentError> {
        self.store()
            .get_push_request(checkout_request_id.trim())
            .await?
            .ok_or(PaymentError::NotFound("Payment"))
    }

    pub async fn user_status(&self, raw_phone: &str) -> Result<PushUserStatus, PaymentError> {
        let phone = phone::normalize(raw_phone).unwrap_or_else(|_| raw_phone.trim().to_string());
        let now = Utc::now();
        let subscription = self.store().get_subscription(&phone).await?;

        Ok(match subscription {
            Some(sub) => PushUserStatus {
                phone,
                is_active: sub.is_active_at(now),
                expires_at: Some(sub.expires_at),
                days_remaining: days_remaining(sub.expires_at, now),
                subscription: Some(sub),
            },
            None => PushUserStatus {
                phone,
                subscription: None,
                is_active: false,
                expires_at: None,
                days_remaining: 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::notify::LogNotifier;
    use chrono::Duration;
    use serde_json::json;

    fn gateway() -> PushPaymentGateway {
        let lifecycle = PaymentLifecycle::new(Arc::new(MemoryStore::new()), Arc::new(LogNotifier), "s", "889900");
        PushPaymentGateway::new(Arc::new(lifecycle), None, 10)
    }

    fn pending(id: &str, plan_id: &str) -> PushPaymentRequest {
        PushPaymentRequest {
            checkout_request_id: id.to_string(),
            merchant_request_id: None,
            phone: "254711000111".into(),
            amount: 299,
            plan_id: plan_id.into(),
            status: PushStatus::Pending,
            initiated_at: Utc::now(),
            resolved_at: None,
            receipt_number: None,
            transaction_date: None,
            failure_reason: None,
        }
    }

    fn success(id: &str) -> Vec<u8> {
        json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 299},
                    {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                    {"Name": "Balance"},
                    {"Name": "TransactionDate", "Value": 20191219102115u64},
                    {"Name": "PhoneNumber", "Value": 254711000111u64}
                ]}
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn metadata_tolerates_missing_and_numeric_values() {
        let env: CallbackEnvelope = serde_json::from_slice(&success("ws_CO_1")).unwrap();
        let cb = env.body.stk_callback;
        assert_eq!(cb.metadata("MpesaReceiptNumber").as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(cb.metadata("TransactionDate").as_deref(), Some("20191219102115"));
        assert_eq!(cb.metadata("Balance"), None);
        assert_eq!(cb.metadata("Nope"), None);
    }

    #[test]
    fn failure_carries_result_desc() {
        let env: CallbackEnvelope = serde_json::from_value(json!({
            "Body": {"stkCallback": {
                "CheckoutRequestID": "ws_CO_2",
                "ResultCode": 1032,
                "ResultDesc": "Request cancelled by user"
            }}
        }))
        .unwrap();
        assert_eq!(
            env.body.stk_callback.resolution(),
            PushResolution::Failed {
                reason: "Request cancelled by user".into()
            }
        );
    }

    #[tokio::test]
    async fn initiate_validates_before_calling_upstream() {
        let gw = gateway();
        let input = |phone: &str, amount: Option<i64>| PushInitiation {
            phone: Some(phone.into()),
            amount,
            plan_id: Some("monthly".into()),
        };
        assert!(matches!(
            gw.initiate(input("254711000111", Some(5))).await,
            Err(PaymentError::AmountTooLow { minimum: 10 })
        ));
        assert!(matches!(
            gw.initiate(input("0711000111", Some(299))).await,
            Err(PaymentError::InvalidPhone)
        ));
        assert!(matches!(
            gw.initiate(input("254811000111", Some(299))).await,
            Err(PaymentError::InvalidPhone)
        ));
        assert!(matches!(
            gw.initiate(input("254711000111", None)).await,
            Err(PaymentError::MissingFields(_))
        ));
        assert!(matches!(
            gw.initiate(input("254711000111", Some(299))).await,
            Err(PaymentError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn repeat_success_activates_once() {
        let gw = gateway();
        gw.store().insert_push_request(&pending("ws_CO_3", "quarterly")).await.unwrap();

        let first = gw.resolve(&success("ws_CO_3")).await;
        let CallbackOutcome::Completed(req) = first else {
            panic!("unexpected {first:?}");
        };
        assert_eq!(req.receipt_number.as_deref(), Some("NLJ7RT61SV"));

        let sub = gw.store().get_subscription("254711000111").await.unwrap().unwrap();
        assert_eq!(sub.expires_at - sub.activated_at, Duration::days(90));

        assert_eq!(gw.resolve(&success("ws_CO_3")).await, CallbackOutcome::AlreadyResolved);
        let again = gw.store().get_subscription("254711000111").await.unwrap().unwrap();
        assert_eq!(again, sub);
    }

    #[tokio::test]
    async fn unknown_plan_gets_monthly_period() {
        let gw = gateway();
        gw.store().insert_push_request(&pending("ws_CO_4", "lifetime")).await.unwrap();
        gw.resolve(&success("ws_CO_4")).await;
        let status = gw.user_status("254711000111").await.unwrap();
        assert!(status.is_active);
        assert_eq!(status.days_remaining, 30);
    }

    #[tokio::test]
    async fn junk_and_unknown_ids_are_absorbed() {
        let gw = gateway();
        assert_eq!(gw.resolve(b"not json").await, CallbackOutcome::Malformed);
        assert_eq!(gw.resolve(br#"{"Body":{}}"#).await, CallbackOutcome::Malformed);
        assert_eq!(gw.resolve(&success("ws_CO_missing")).await, CallbackOutcome::Unknown);
        assert_eq!(gw.store().count_push_requests().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_queries() {
        let gw = gateway();
        assert!(matches!(gw.query_status("ws_CO_x").await, Err(PaymentError::NotFound(_))));
        let none = gw.user_status("0711000111").await.unwrap();
        assert_eq!(none.phone, "254711000111");
        assert!(!none.is_active);
        assert_eq!(none.days_remaining, 0);
    }
}
