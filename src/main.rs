// src/main.rs
use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use env_logger::Env;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use till_pay::api::daraja_client::DarajaClient;
use till_pay::config::Config;
use till_pay::db::{PaymentStore, PgStore};
use till_pay::lifecycle::PaymentLifecycle;
use till_pay::memory_store::MemoryStore;
use till_pay::notify::{LogNotifier, Notifier, SmtpNotifier};
use till_pay::push::PushPaymentGateway;
use till_pay::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(io::Error::other)?;

    let store: Arc<dyn PaymentStore> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgStore::connect(url).await.map_err(io::Error::other)?),
        None => {
            log::warn!("DATABASE_URL not set, claims are kept in memory and lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match config.smtp.as_ref() {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp, config.branding.clone()).map_err(io::Error::other)?),
        None => {
            log::warn!("SMTP_HOST not set, emails are logged only");
            Arc::new(LogNotifier)
        }
    };

    let daraja = match config.daraja.clone() {
        Some(daraja) => {
            log::info!("daraja configured: {daraja:?}");
            Some(DarajaClient::new(daraja).map_err(io::Error::other)?)
        }
        None => {
            log::warn!("DARAJA_CONSUMER_KEY not set, STK push initiation is disabled");
            None
        }
    };

    let lifecycle = Arc::new(PaymentLifecycle::new(
        store,
        notifier,
        config.admin_secret.clone(),
        config.till_number.clone(),
    ));
    let gateway = Arc::new(PushPaymentGateway::new(
        Arc::clone(&lifecycle),
        daraja,
        config.push_min_amount,
    ));
    let state = web::Data::new(AppState { lifecycle, gateway });

    log::info!("listening on {}:{}", config.bind_addr, config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .configure(api::configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
