//! # plantlens: plant photo analysis service
//!
//! `plantlens` takes a photo of a plant, asks a vision-capable language model to describe it, and
//! turns the free-text answer into a four-part care card: the plant's name, where to plant it,
//! why it is worth keeping, and how to look after it. Every analysis is kept in a per-user
//! history, and each one costs credits from a small ledger.
//!
//! ## Request flow
//!
//! ```text
//! upload -> validate -> credit check -> base64 -> vision API -> parse -> debit + store -> card
//! ```
//!
//! An upload arrives as multipart form data at `POST /api/v1/analyses`. After the size and type
//! checks, the caller's balance is checked against the per-analysis cost. The image is then
//! base64-encoded and sent, together with a fixed prompt, to an OpenAI-compatible
//! chat-completions endpoint ([`analysis::VisionClient`]). The reply text goes through
//! [`analysis::parse`], which never fails: any section it cannot find is filled with
//! [`analysis::NOT_AVAILABLE`]. The credit debit and the history row are written in one
//! transaction, so an analysis is either paid for and stored, or neither.
//!
//! ## Components
//!
//! - [`analysis`]: the response parser and the vision client behind the [`analysis::AnalyzeImage`]
//!   trait
//! - [`api`]: axum handlers and wire models
//! - [`auth`]: native accounts, Argon2 passwords and JWT sessions
//! - [`db`]: SQLite repositories for users, the credit ledger and analysis history
//! - [`config`]: YAML plus environment configuration
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use plantlens::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     plantlens::install_crypto_provider();
//!     let args = plantlens::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     plantlens::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
pub mod analysis;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    analysis::{AnalyzeImage, VisionClient},
    auth::password::{self, Argon2Params},
    config::{CorsOrigin, PasswordConfig},
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::Error,
    openapi::ApiDoc,
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use types::{AnalysisId, UserId};

/// Room for multipart boundaries and headers on top of the image itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Install the process-wide rustls crypto provider.
///
/// reqwest is built without a bundled provider, so this must run before the first HTTP client is
/// created. Repeated calls are harmless.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .analyzer(Arc::new(VisionClient::new(&config.vision)?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub analyzer: Arc<dyn AnalyzeImage>,
}

/// Get the plantlens database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial admin user, or bring an existing one up to date.
///
/// Idempotent: an existing account with this email is promoted to admin and, if a password is
/// given, has its password replaced. The email doubles as the username.
#[instrument(skip_all)]
pub async fn create_initial_admin_user(
    email: &str,
    password: Option<&str>,
    password_config: &PasswordConfig,
    db: &SqlitePool,
) -> Result<UserId, Error> {
    let password_hash = match password {
        Some(pwd) => {
            let pwd = pwd.to_string();
            let params = Argon2Params::from(password_config);
            let hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&pwd, Some(params)))
                .await
                .map_err(|e| Error::Internal {
                    operation: format!("spawn admin password hashing task: {e}"),
                })??;
            Some(hash)
        }
        None => None,
    };

    let mut tx = crate::db::begin_write(db).await?;
    let mut user_repo = Users::new(&mut tx);

    let user_id = if let Some(existing_user) = user_repo.get_user_by_email(email).await? {
        if !existing_user.is_admin {
            user_repo.set_admin(existing_user.id, true).await?;
        }
        if password_hash.is_some() {
            user_repo
                .update(
                    existing_user.id,
                    &UserUpdateDBRequest {
                        password_hash,
                        ..Default::default()
                    },
                )
                .await?;
        }
        existing_user.id
    } else {
        let created_user = user_repo
            .create(&UserCreateDBRequest {
                username: email.to_string(),
                email: email.to_string(),
                display_name: None,
                is_admin: true,
                auth_source: "system".to_string(),
                password_hash,
            })
            .await?;
        info!("Created initial admin user {}", email);
        created_user.id
    };

    tx.commit().await.map_err(DbError::from)?;
    Ok(user_id)
}

/// Open (creating if needed) the SQLite database, run migrations and ensure the admin exists.
async fn setup_database(config: &Config) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.database.busy_timeout)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect_with(options)
        .await?;
    info!("Connected to database");

    migrator().run(&pool).await?;

    create_initial_admin_user(
        &config.admin_email,
        config.admin_password.as_deref(),
        &config.auth.native.password,
        &pool,
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allowed = &config.auth.security.cors.allowed_origins;

    // tower-http rejects `*` inside an origin list
    let allow_origin = if allowed.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in allowed {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// - `/healthz`
/// - `/authentication/*`: registration, login, logout, password change
/// - `/api/v1/*`: users, balances, transactions and analyses
/// - `/api-docs/openapi.json` and the Scalar UI at `/docs`
/// - `/internal/metrics` when metrics are enabled
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{analyses, auth, credits, transactions, users};

    let auth_routes = Router::new()
        .route("/authentication/register", get(auth::get_registration_info).post(auth::register))
        .route("/authentication/login", get(auth::get_login_info).post(auth::login))
        .route("/authentication/logout", post(auth::logout))
        .route("/authentication/password-change", post(auth::change_password))
        .with_state(state.clone());

    let upload_limit = state.config.uploads.max_image_bytes + MULTIPART_OVERHEAD_BYTES;

    let api_routes = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/users/{user_id}/balance", get(credits::get_user_balance))
        .route(
            "/transactions",
            post(transactions::create_transaction).get(transactions::list_transactions),
        )
        .route("/transactions/{transaction_id}", get(transactions::get_transaction))
        .route(
            "/analyses",
            post(analyses::create_analysis)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(analyses::list_analyses),
        )
        .route("/analyses/{analysis_id}", get(analyses::get_analysis))
        .route("/analyses/{analysis_id}/image", get(analyses::get_analysis_image))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(auth_routes)
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
    pool: SqlitePool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting plantlens with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;

        if config.vision.api_key.is_none() {
            warn!("No vision API key configured; analyses will fail until one is set");
        }
        let analyzer: Arc<dyn AnalyzeImage> = Arc::new(VisionClient::new(&config.vision)?);

        Self::with_analyzer(config, pool, analyzer)
    }

    /// Assemble the application around an already-migrated pool and a chosen analyzer
    pub fn with_analyzer(config: Config, pool: SqlitePool, analyzer: Arc<dyn AnalyzeImage>) -> anyhow::Result<Self> {
        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .analyzer(analyzer)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "plantlens listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config};
    use crate::analysis::client::StaticAnalyzer;

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_initial_admin_user_new_user(pool: SqlitePool) {
        let config = PasswordConfig::default();
        let user_id = create_initial_admin_user("admin@plants.test", None, &config, &pool).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get_by_id(user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "admin@plants.test");
        assert_eq!(user.username, "admin@plants.test");
        assert!(user.is_admin);
        assert_eq!(user.auth_source, "system");
        assert!(user.password_hash.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_initial_admin_user_existing_user(pool: SqlitePool) {
        let config = PasswordConfig {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            ..Default::default()
        };
        let existing = crate::test_utils::create_test_user(&pool).await;

        let user_id = create_initial_admin_user(&existing.email, Some("new-admin-password"), &config, &pool)
            .await
            .unwrap();
        assert_eq!(user_id, existing.id);

        let mut conn = pool.acquire().await.unwrap();
        let user = Users::new(&mut conn).get_by_id(user_id).await.unwrap().unwrap();
        assert!(user.is_admin);
        let hash = user.password_hash.unwrap();
        assert!(password::verify_string("new-admin-password", &hash).unwrap());

        // Running again is a no-op apart from the password
        let again = create_initial_admin_user(&existing.email, None, &config, &pool).await.unwrap();
        assert_eq!(again, existing.id);
        assert_eq!(Users::new(&mut conn).count().await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_healthz_and_openapi(pool: SqlitePool) {
        let server = create_test_app(pool, Arc::new(StaticAnalyzer::new("")));

        let health = server.get("/healthz").await;
        health.assert_status_ok();
        health.assert_text("OK");

        let spec = server.get("/api-docs/openapi.json").await;
        spec.assert_status_ok();
        let json: serde_json::Value = spec.json();
        assert!(json["paths"]["/api/v1/analyses"]["post"].is_object());
        assert!(json["paths"]["/authentication/login"]["post"].is_object());
        assert!(json["components"]["schemas"]["AnalysisResponse"].is_object());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_metrics_route_absent_when_disabled(pool: SqlitePool) {
        let server = create_test_app(pool, Arc::new(StaticAnalyzer::new("")));
        server.get("/internal/metrics").await.assert_status_not_found();
    }

    #[test]
    fn test_cors_layer_accepts_configured_origins() {
        let mut config = create_test_config();
        assert!(create_cors_layer(&config).is_ok());

        config.auth.security.cors.allowed_origins = vec![CorsOrigin::Wildcard];
        config.auth.security.cors.allow_credentials = false;
        assert!(create_cors_layer(&config).is_ok());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_wildcard_origin_serves_any_origin(pool: SqlitePool) {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins = vec![
            CorsOrigin::Url("https://plants.example.com".parse().unwrap()),
            CorsOrigin::Wildcard,
        ];
        config.auth.security.cors.allow_credentials = false;
        assert!(config.validate().is_ok());

        let server = create_test_app_with_config(pool, Arc::new(StaticAnalyzer::new("")), config);
        let response = server
            .method(http::Method::OPTIONS, "/api/v1/analyses")
            .add_header(http::header::ORIGIN, "https://anywhere.example.net")
            .add_header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .await;
        assert_eq!(response.header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cors_preflight(pool: SqlitePool) {
        let server = create_test_app(pool, Arc::new(StaticAnalyzer::new("")));

        let response = server
            .method(http::Method::OPTIONS, "/api/v1/analyses")
            .add_header(http::header::ORIGIN, "http://localhost:5173")
            .add_header(http::header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .await;
        assert_eq!(
            response.header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "http://localhost:5173"
        );
    }
}
