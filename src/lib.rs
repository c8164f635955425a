pub mod api;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod lifecycle;
pub mod memory_store;
pub mod models;
pub mod notify;
pub mod phone;
pub mod plans;
pub mod push;
pub mod stats;

use std::sync::Arc;

use lifecycle::PaymentLifecycle;
use push::PushPaymentGateway;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<PaymentLifecycle>,
    pub gateway: Arc<PushPaymentGateway>,
}
