//! Test utilities shared by the unit and handler tests.

use crate::analysis::{AnalyzeImage, client::StaticAnalyzer};
use crate::api::models::users::CurrentUser;
use crate::auth::session;
use crate::config::{Config, NativeAuthConfig, PasswordConfig, SessionConfig};
use crate::db::{
    handlers::{Credits, Repository, Users},
    models::{
        credits::{CreditTransactionCreateDBRequest, CreditTransactionType},
        users::{UserCreateDBRequest, UserDBResponse},
    },
};
use crate::{AppState, Application};
use axum_test::TestServer;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Plant description that fills every section of the care card
pub const FULL_ANALYSIS_TEXT: &str = "Plant name
Monstera deliciosa

Suitable planting locations
Indoors in bright, indirect light

Benefits of keeping this plant
Purifies indoor air

Any important advisory or care tips
Water when the top soil is dry";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        auth: crate::config::AuthConfig {
            native: NativeAuthConfig {
                enabled: true,
                allow_registration: true,
                // Cheap hashing keeps the suite fast
                password: PasswordConfig {
                    argon2_memory_kib: 1024,
                    argon2_iterations: 1,
                    argon2_parallelism: 1,
                    ..Default::default()
                },
                session: SessionConfig {
                    cookie_secure: false,
                    ..Default::default()
                },
            },
            ..Default::default()
        },
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    }
}

async fn insert_user(pool: &SqlitePool, prefix: &str, is_admin: bool) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);
    let username = format!("{prefix}_{}", Uuid::new_v4().simple());
    let email = format!("{username}@example.com");

    let user_create = UserCreateDBRequest {
        username,
        email,
        display_name: Some("Test User".to_string()),
        is_admin,
        auth_source: "test".to_string(),
        password_hash: None,
    };

    users_repo.create(&user_create).await.expect("Failed to create test user")
}

pub async fn create_test_user(pool: &SqlitePool) -> UserDBResponse {
    insert_user(pool, "testuser", false).await
}

pub async fn create_test_admin_user(pool: &SqlitePool) -> UserDBResponse {
    insert_user(pool, "testadmin", true).await
}

/// Give `user_id` some credits through an admin grant
pub async fn grant_credits(pool: &SqlitePool, user_id: crate::UserId, amount: i64) {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Credits::new(&mut conn)
        .create_transaction(&CreditTransactionCreateDBRequest {
            user_id,
            transaction_type: CreditTransactionType::AdminGrant,
            amount,
            description: Some("test grant".to_string()),
        })
        .await
        .expect("Failed to grant test credits");
}

pub fn create_test_state(pool: SqlitePool) -> AppState {
    AppState::builder()
        .db(pool)
        .config(create_test_config())
        .analyzer(Arc::new(StaticAnalyzer::new(FULL_ANALYSIS_TEXT)))
        .build()
}

pub fn create_test_app(pool: SqlitePool, analyzer: Arc<dyn AnalyzeImage>) -> TestServer {
    create_test_app_with_config(pool, analyzer, create_test_config())
}

pub fn create_test_app_with_config(pool: SqlitePool, analyzer: Arc<dyn AnalyzeImage>, config: Config) -> TestServer {
    Application::with_analyzer(config, pool, analyzer)
        .expect("Failed to create application")
        .into_test_server()
}

/// `Authorization` header carrying a fresh session token for `user`
pub fn add_auth_headers(user: &UserDBResponse) -> Vec<(String, String)> {
    let config = create_test_config();
    let token = session::create_session_token(&CurrentUser::from(user.clone()), &config).expect("Failed to sign test token");
    vec![("authorization".to_string(), format!("Bearer {token}"))]
}
