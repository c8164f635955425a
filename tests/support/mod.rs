#![allow(dead_code)]

use std::env;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

use till_pay::api::daraja_client::DarajaClient;
use till_pay::config::DarajaConfig;
use till_pay::db::{PaymentStore, PgStore};
use till_pay::error::StoreError;
use till_pay::lifecycle::PaymentLifecycle;
use till_pay::memory_store::MemoryStore;
use till_pay::models::{
    ClaimFilter, Identity, PaymentClaim, PaymentStatus, PushPaymentRequest, PushResolution, Session,
    UserSubscription,
};
use till_pay::notify::{Notifier, NotifyError};
use till_pay::plans::Plan;
use till_pay::push::PushPaymentGateway;
use till_pay::AppState;
use uuid::Uuid;

pub const ADMIN_SECRET: &str = "test-admin-secret";
pub const TILL_NUMBER: &str = "889900";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    PaymentReceived { email: String, code: String },
    Activated { email: String, code: String },
}

/// Records every notification; optionally fails each one after recording it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: StdMutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        RecordingNotifier {
            sent: StdMutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Notifications are spawned, so give them a moment to land.
    pub async fn wait_for(&self, count: usize) -> Vec<Sent> {
        for _ in 0..100 {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent()
    }

    fn record(&self, entry: Sent) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(entry);
        }
        if self.fail {
            let bad: Result<lettre::Address, _> = "not an address".parse();
            return Err(NotifyError::Address(bad.unwrap_err()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn payment_received(&self, claim: &PaymentClaim, _plan: &Plan) -> Result<(), NotifyError> {
        self.record(Sent::PaymentReceived {
            email: claim.email.clone(),
            code: claim.transaction_code.clone(),
        })
    }

    async fn subscription_activated(&self, claim: &PaymentClaim, _plan: &Plan) -> Result<(), NotifyError> {
        self.record(Sent::Activated {
            email: claim.email.clone(),
            code: claim.transaction_code.clone(),
        })
    }
}

/// [`MemoryStore`] with injectable write failures. Each counter is the number
/// of upcoming calls to that operation that fail before it starts working.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub session_failures: AtomicUsize,
    pub push_insert_failures: AtomicUsize,
    pub resolve_failures: AtomicUsize,
}

fn take_failure(counter: &AtomicUsize) -> Result<(), StoreError> {
    let failing = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
    }
    Ok(())
}

#[async_trait]
impl PaymentStore for FlakyStore {
    async fn insert_claim(&self, claim: &PaymentClaim) -> Result<(), StoreError> {
        self.inner.insert_claim(claim).await
    }

    async fn get_claim(&self, id: Uuid) -> Result<Option<PaymentClaim>, StoreError> {
        self.inner.get_claim(id).await
    }

    async fn find_claim_by_transaction_code(&self, code: &str) -> Result<Option<PaymentClaim>, StoreError> {
        self.inner.find_claim_by_transaction_code(code).await
    }

    async fn update_claim_status(
        &self,
        id: Uuid,
        status: PaymentStatus,
        verified_at: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError> {
        self.inner.update_claim_status(id, status, verified_at).await
    }

    async fn find_active_claim(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Option<PaymentClaim>, StoreError> {
        self.inner.find_active_claim(identity, now).await
    }

    async fn claims_for_identity(&self, identity: &Identity, limit: usize) -> Result<Vec<PaymentClaim>, StoreError> {
        self.inner.claims_for_identity(identity, limit).await
    }

    async fn claims_with_status(
        &self,
        status: PaymentStatus,
        limit: Option<usize>,
    ) -> Result<Vec<PaymentClaim>, StoreError> {
        self.inner.claims_with_status(status, limit).await
    }

    async fn count_claims(&self, status: Option<PaymentStatus>) -> Result<u64, StoreError> {
        self.inner.count_claims(status).await
    }

    async fn list_claims(&self, filter: &ClaimFilter) -> Result<(Vec<PaymentClaim>, u64), StoreError> {
        self.inner.list_claims(filter).await
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        take_failure(&self.session_failures)?;
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(id).await
    }

    async fn insert_push_request(&self, request: &PushPaymentRequest) -> Result<(), StoreError> {
        take_failure(&self.push_insert_failures)?;
        self.inner.insert_push_request(request).await
    }

    async fn get_push_request(&self, checkout_request_id: &str) -> Result<Option<PushPaymentRequest>, StoreError> {
        self.inner.get_push_request(checkout_request_id).await
    }

    async fn resolve_push_request(
        &self,
        checkout_request_id: &str,
        resolution: &PushResolution,
        at: DateTime<Utc>,
    ) -> Result<Option<PushPaymentRequest>, StoreError> {
        take_failure(&self.resolve_failures)?;
        self.inner.resolve_push_request(checkout_request_id, resolution, at).await
    }

    async fn count_push_requests(&self) -> Result<u64, StoreError> {
        self.inner.count_push_requests().await
    }

    async fn upsert_subscription(&self, subscription: &UserSubscription) -> Result<(), StoreError> {
        self.inner.upsert_subscription(subscription).await
    }

    async fn get_subscription(&self, identity: &str) -> Result<Option<UserSubscription>, StoreError> {
        self.inner.get_subscription(identity).await
    }

    async fn count_active_subscriptions(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.count_active_subscriptions(now).await
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<dyn PaymentStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn build_state_with(store: Arc<dyn PaymentStore>, notifier: Arc<RecordingNotifier>, daraja: Option<DarajaClient>) -> TestApp {
    let lifecycle = Arc::new(PaymentLifecycle::new(
        Arc::clone(&store),
        notifier.clone(),
        ADMIN_SECRET,
        TILL_NUMBER,
    ));
    let gateway = Arc::new(PushPaymentGateway::new(Arc::clone(&lifecycle), daraja, 10));
    TestApp {
        state: AppState { lifecycle, gateway },
        store,
        notifier,
    }
}

pub fn build_state() -> TestApp {
    build_state_with(Arc::new(MemoryStore::new()), Arc::new(RecordingNotifier::default()), None)
}

pub fn daraja_config(base_url: &str) -> DarajaConfig {
    DarajaConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        consumer_key: "consumer-key".to_string(),
        consumer_secret: "consumer-secret".to_string(),
        business_short_code: "174379".to_string(),
        passkey: "test-passkey".to_string(),
        callback_base_url: "https://cb.example.com".to_string(),
    }
}

pub fn build_state_with_daraja(base_url: &str) -> TestApp {
    let client = DarajaClient::new(daraja_config(base_url)).expect("daraja client");
    build_state_with(
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingNotifier::default()),
        Some(client),
    )
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub store: PgStore,
    _guard: MutexGuard<'static, ()>,
}

/// Recreates the database named in `TEST_DATABASE_URL` and migrates it.
/// Callers are `#[ignore]`d, so reaching this without the variable is an error.
pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let options = PgConnectOptions::from_str(&test_url).expect("invalid TEST_DATABASE_URL");
    let db_name = options
        .get_database()
        .filter(|name| !name.is_empty())
        .expect("TEST_DATABASE_URL must name a database")
        .to_string();
    assert!(
        db_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        "test database name must be a plain identifier, got {db_name}"
    );

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect_with(options.database("postgres"))
        .await
        .expect("connect maintenance db");
    sqlx::query(&format!("DROP DATABASE IF EXISTS {db_name} WITH (FORCE)"))
        .execute(&admin_pool)
        .await
        .expect("drop test db");
    sqlx::query(&format!("CREATE DATABASE {db_name}"))
        .execute(&admin_pool)
        .await
        .expect("create test db");
    admin_pool.close().await;

    let store = PgStore::connect(&test_url).await.expect("connect test db");
    TestDb { store, _guard: guard }
}
