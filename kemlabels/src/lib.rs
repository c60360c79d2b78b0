//! # kemlabels: Shipping Label Ordering Backend
//!
//! `kemlabels` is the backend of a shipping label storefront. Users sign up, verify
//! their email address, buy credits with a card or with crypto, and spend those
//! credits on USPS and UPS labels bought from an upstream label API, one at a time or
//! in bulk from an uploaded spreadsheet.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP
//! layer. Persistence sits behind the [`db::Database`] trait, backed by PostgreSQL in
//! production or by process memory in development and tests.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) exposes `/auth/*`, `/user/*`, `/order/*` and
//! `/payment/*`. Requests are authenticated by a signed session cookie.
//!
//! The **order service** ([`orders`]) validates an order, checks the balance, buys
//! the labels, bills the user once and mails the labels. Bulk orders fetch every label
//! before billing, so a failing row bills nothing.
//!
//! The **payment providers** ([`payment_providers`]) create Stripe payment intents and
//! Coinbase Commerce charges and verify the webhooks that settle them. A settled
//! payment is credited at most once.
//!
//! **Background services** ([`cleanup`]) run alongside the HTTP server: a daily job
//! removes unverified accounts and expired tokens, and a weekly job sweeps stored
//! label files.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use kemlabels::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = kemlabels::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     kemlabels::telemetry::init_telemetry(config.log_format)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod labels;
mod openapi;
pub mod orders;
pub mod payment_providers;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{auth as auth_handlers, orders as order_handlers, payments, users},
    config::{CorsOrigin, DatabaseConfig},
    db::{Database, MemoryDatabase, PgDatabase},
    email::{EmailService, Notifier},
    labels::{provider::HttpLabelProvider, provider::LabelProvider, storage::LabelStorage},
    openapi::ApiDoc,
    payment_providers::PaymentProvider,
};

pub use config::Config;
pub use db::postgres::migrator;
pub use types::UserId;

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(db)
///     .config(config)
///     .label_provider(provider)
///     .notifier(notifier)
///     .storage(LabelStorage::new("./labels"))
///     .maybe_card(card)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub config: Config,
    pub label_provider: Arc<dyn LabelProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub storage: LabelStorage,
    /// Card rail; `None` answers 501
    pub card: Option<Arc<dyn PaymentProvider>>,
    /// Crypto rail; `None` answers 501
    pub crypto: Option<Arc<dyn PaymentProvider>>,
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.security.cors;
    let allow_origin = if cors_config
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard))
    {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// # Errors
///
/// Returns an error if the CORS configuration holds an origin that is not a valid
/// header value.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let bulk_body_limit = state.config.orders.bulk_upload_max_bytes + order_handlers::MULTIPART_OVERHEAD;

    let auth_routes = Router::new()
        .route("/auth/signin", post(auth_handlers::signin))
        .route("/auth/signup", post(auth_handlers::signup))
        .route("/auth/logout", post(auth_handlers::logout));

    let user_routes = Router::new()
        .route("/user/emailExists", post(users::email_exists))
        .route("/user/forgotPassword", post(users::forgot_password))
        .route("/user/validateOtp", post(users::validate_otp))
        .route("/user/updatePassword", post(users::update_password))
        .route("/user/updateUsername", post(users::update_username))
        .route("/user/updateEmail", post(users::update_email))
        .route("/user/updateEmailRequest", post(users::update_email_request))
        .route("/user/updatePasswordRequest", post(users::update_password_request))
        .route("/user/resendOtpEmail", post(users::resend_otp_email))
        .route("/user/verifyEmail", get(users::verify_email))
        .route("/user/{id}/verify/{token}", get(users::confirm_verification))
        .route("/user/checkVerification", get(users::check_verification));

    let order_routes = Router::new()
        .route("/order/label/single", post(order_handlers::create_single_order))
        .route(
            "/order/label/bulk",
            post(order_handlers::create_bulk_order).layer(DefaultBodyLimit::max(bulk_body_limit)),
        )
        .route("/order/senderInfo", get(order_handlers::get_sender_info))
        .route("/order/label/pricings", get(order_handlers::get_pricings));

    let payment_routes = Router::new()
        .route("/payment/stripe/create", post(payments::create_card_payment))
        .route("/payment/webhook", post(payments::card_webhook))
        .route("/payment/crypto/create", post(payments::create_crypto_payment))
        .route("/payment/crypto/webhook", post(payments::crypto_webhook))
        .route("/payment/creditHistory", get(payments::credit_history));

    let cors = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(auth_routes)
        .merge(user_routes)
        .merge(order_routes)
        .merge(payment_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Background tasks that run alongside the HTTP server.
///
/// Dropping this struct cancels the shutdown token through `drop_guard`, which stops
/// every task. [`shutdown`](BackgroundServices::shutdown) additionally waits for them.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Start the cleanup jobs enabled in the configuration
    pub fn start(state: &AppState) -> Self {
        let shutdown_token = CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();
        let background_tasks = cleanup::spawn(state, shutdown_token.clone());
        info!(tasks = background_tasks.len(), "Background services started");
        Self {
            background_tasks,
            shutdown_token,
            drop_guard: Some(drop_guard),
        }
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

async fn connect_database(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Database>> {
    match config {
        DatabaseConfig::Postgres { url, pool } => Ok(Arc::new(PgDatabase::connect(url, pool).await?)),
        DatabaseConfig::Memory => {
            warn!("Using the in-memory database; all data is lost on restart");
            Ok(Arc::new(MemoryDatabase::new()))
        }
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] connects the database, runs migrations, builds
///    the label, email and payment clients and starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, stops background services
///    and closes the database
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting kemlabels with configuration: {:#?}", config);

        let db = connect_database(&config.database).await?;
        let label_provider = HttpLabelProvider::new(config.label_provider.clone())?;
        let notifier = EmailService::new(&config)?;
        let (card, crypto) = payment_providers::create_providers(&config)?;
        info!(card = card.is_some(), crypto = crypto.is_some(), "Payment rails configured");

        let app_state = AppState::builder()
            .db(db)
            .config(config.clone())
            .label_provider(Arc::new(label_provider) as Arc<dyn LabelProvider>)
            .notifier(Arc::new(notifier) as Arc<dyn Notifier>)
            .storage(LabelStorage::new(&config.orders.label_storage_dir))
            .maybe_card(card.map(|p| Arc::new(p) as Arc<dyn PaymentProvider>))
            .maybe_crypto(crypto.map(|p| Arc::new(p) as Arc<dyn PaymentProvider>))
            .build();

        let bg_services = BackgroundServices::start(&app_state);
        let router = build_router(app_state.clone())?;

        Ok(Self {
            router,
            app_state,
            config,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("kemlabels listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.app_state.db.close().await;

        Ok(())
    }
}
