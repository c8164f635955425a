use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::payments::submit_payment,
        crate::api::payments::subscription_status,
        crate::api::payments::payment_history,
        crate::api::payments::session_status,
        crate::api::payments::verify_payment,
        crate::api::admin::payment_stats,
        crate::api::admin::pending_payments,
        crate::api::admin::list_payments,
        crate::api::admin::payment_by_id,
        crate::api::mpesa::initiate_payment,
        crate::api::mpesa::payment_callback,
        crate::api::mpesa::payment_status,
        crate::api::mpesa::user_status,
        crate::api::health::health
    ),
    components(
        schemas(
            crate::lifecycle::ClaimSubmission,
            crate::api::payments::VerifyRequest,
            crate::models::PaymentClaim,
            crate::models::PaymentStatus,
            crate::models::ClaimPage,
            crate::models::PaymentStats,
            crate::models::SubscriptionStatus,
            crate::models::ActiveSubscription,
            crate::models::Session,
            crate::models::PushPaymentRequest,
            crate::models::PushStatus,
            crate::models::UserSubscription,
            crate::push::PushInitiation,
            crate::push::PushStarted,
            crate::push::PushUserStatus,
            crate::api::health::HealthCounts
        )
    ),
    tags(
        (name = "payments", description = "Till payment claims"),
        (name = "admin", description = "Operator review, requires X-Admin-Key"),
        (name = "mpesa", description = "STK push payments and Daraja callbacks"),
        (name = "health", description = "Liveness and counts")
    )
)]
pub struct ApiDoc;
