use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthSuccessResponse, ChangePasswordRequest, LoginInfo, LoginRequest, LoginResponse, LogoutResponse,
            RegisterRequest, RegisterResponse, RegistrationInfo,
        },
        users::{CurrentUser, UserResponse},
    },
    auth::{
        password::{self, Argon2Params},
        session,
    },
    config::{Config, PasswordConfig},
    db::{
        self,
        errors::DbError,
        handlers::{Credits, Repository, Users},
        models::{
            credits::CreditTransactionCreateDBRequest,
            users::{UserCreateDBRequest, UserUpdateDBRequest},
        },
    },
    errors::Error,
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    }
}

fn require_native_auth(config: &Config) -> Result<(), Error> {
    if config.auth.native.enabled {
        Ok(())
    } else {
        Err(Error::BadRequest {
            message: "Native authentication is disabled".to_string(),
        })
    }
}

/// Hash on a blocking thread; Argon2 is deliberately slow
async fn hash_password(password: String, config: &PasswordConfig) -> Result<String, Error> {
    let params = Argon2Params::from(config);
    tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })?
}

async fn verify_password(password: String, hash: String) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?
}

/// Get registration information
#[utoipa::path(
    get,
    path = "/authentication/register",
    tag = "authentication",
    responses(
        (status = 200, description = "Registration info", body = RegistrationInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_registration_info(State(state): State<AppState>) -> Result<Json<RegistrationInfo>, Error> {
    let enabled = state.config.auth.native.enabled && state.config.auth.native.allow_registration;
    Ok(Json(RegistrationInfo {
        enabled,
        message: if enabled {
            "Registration is enabled".to_string()
        } else {
            "Registration is disabled".to_string()
        },
    }))
}

/// Register a new user account
#[utoipa::path(
    post,
    path = "/authentication/register",
    request_body = RegisterRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "User registered successfully", body = AuthResponse),
        (status = 400, description = "Invalid input or email already registered"),
        (status = 409, description = "Username already taken"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<RegisterRequest>) -> Result<RegisterResponse, Error> {
    require_native_auth(&state.config)?;

    if !state.config.auth.native.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let password_config = &state.config.auth.native.password;
    password::validate_password(&request.password, password_config)?;

    let mut tx = db::begin_write(&state.db).await?;

    let mut user_repo = Users::new(&mut tx);
    if user_repo.get_user_by_email(&request.email).await?.is_some() {
        return Err(Error::BadRequest {
            message: "An account with this email address already exists".to_string(),
        });
    }

    let password_hash = hash_password(request.password, password_config).await?;
    let created_user = user_repo
        .create(&UserCreateDBRequest {
            username: request.username,
            email: request.email,
            display_name: request.display_name,
            is_admin: false,
            auth_source: "native".to_string(),
            password_hash: Some(password_hash),
        })
        .await?;

    let initial_credits = state.config.credits.initial_credits_for_new_users;
    let balance = if initial_credits > 0 {
        let grant = Credits::new(&mut tx)
            .create_transaction(&CreditTransactionCreateDBRequest::signup_grant(created_user.id, initial_credits))
            .await?;
        grant.balance_after
    } else {
        0
    };

    tx.commit().await.map_err(DbError::from)?;
    tracing::info!(user_id = %crate::types::abbrev_uuid(&created_user.id), "Registered new user");

    let token = session::create_session_token(&CurrentUser::from(created_user.clone()), &state.config)?;
    let cookie = session::create_session_cookie(&token, &state.config);

    let auth_response = AuthResponse {
        user: UserResponse::from(created_user).with_credit_balance(balance),
        message: "Registration successful".to_string(),
    };

    Ok(RegisterResponse { auth_response, cookie })
}

/// Get login information
#[utoipa::path(
    get,
    path = "/authentication/login",
    tag = "authentication",
    responses(
        (status = 200, description = "Login info", body = LoginInfo),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_login_info(State(state): State<AppState>) -> Result<Json<LoginInfo>, Error> {
    Ok(Json(LoginInfo {
        enabled: state.config.auth.native.enabled,
        message: if state.config.auth.native.enabled {
            "Native login is enabled".to_string()
        } else {
            "Native login is disabled".to_string()
        },
    }))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/authentication/login",
    request_body = LoginRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    require_native_auth(&state.config)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut user_repo = Users::new(&mut conn);

    let user = user_repo.get_user_by_email(&request.email).await?.ok_or_else(invalid_credentials)?;
    let password_hash = user.password_hash.clone().ok_or_else(invalid_credentials)?;

    if !verify_password(request.password, password_hash).await? {
        return Err(invalid_credentials());
    }

    user_repo.update_last_login(user.id).await?;
    let user = user_repo.get_by_id(user.id).await?.ok_or_else(invalid_credentials)?;
    let balance = Credits::new(&mut conn).get_user_balance(user.id).await?;

    let token = session::create_session_token(&CurrentUser::from(user.clone()), &state.config)?;
    let cookie = session::create_session_cookie(&token, &state.config);

    let auth_response = AuthResponse {
        user: UserResponse::from(user).with_credit_balance(balance),
        message: "Login successful".to_string(),
    };

    Ok(LoginResponse { auth_response, cookie })
}

/// Logout (clear session)
#[utoipa::path(
    post,
    path = "/authentication/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    let cookie = session::expired_session_cookie(&state.config);

    let auth_response = AuthSuccessResponse {
        message: "Logout successful".to_string(),
    };

    Ok(LogoutResponse { auth_response, cookie })
}

/// Change password for authenticated user
#[utoipa::path(
    post,
    path = "/authentication/password-change",
    request_body = ChangePasswordRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Password changed successfully", body = AuthSuccessResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Current password is incorrect"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<AuthSuccessResponse>, Error> {
    require_native_auth(&state.config)?;

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut user_repo = Users::new(&mut conn);

    let user = user_repo.get_by_id(current_user.id).await?.ok_or_else(|| Error::Unauthenticated {
        message: Some("User not found".to_string()),
    })?;

    let password_hash = user.password_hash.ok_or_else(|| Error::BadRequest {
        message: "Cannot change password for non-native authentication users".to_string(),
    })?;

    if !verify_password(request.current_password, password_hash).await? {
        return Err(Error::Unauthenticated {
            message: Some("Current password is incorrect".to_string()),
        });
    }

    let password_config = &state.config.auth.native.password;
    password::validate_password(&request.new_password, password_config)?;
    let new_password_hash = hash_password(request.new_password, password_config).await?;

    user_repo
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                password_hash: Some(new_password_hash),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(AuthSuccessResponse {
        message: "Password changed successfully".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::client::StaticAnalyzer;
    use crate::db::handlers::credits::CreditTransactionFilter;
    use crate::db::models::credits::CreditTransactionType;
    use crate::test_utils::{create_test_app_with_config, create_test_config};
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use sqlx::SqlitePool;
    use std::sync::Arc;

    fn server(pool: SqlitePool, config: Config) -> TestServer {
        create_test_app_with_config(pool, Arc::new(StaticAnalyzer::new("")), config)
    }

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password: password.to_string(),
            display_name: Some("Test User".to_string()),
        }
    }

    /// `name=value` part of the response's session cookie
    fn session_cookie(response: &axum_test::TestResponse) -> String {
        let set_cookie = response.header("set-cookie");
        let set_cookie = set_cookie.to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_success(pool: SqlitePool) {
        let server = server(pool.clone(), create_test_config());

        let response = server
            .post("/authentication/register")
            .json(&register_request("fern@example.com", "password123"))
            .await;

        response.assert_status(StatusCode::CREATED);
        let set_cookie = response.header("set-cookie");
        let set_cookie = set_cookie.to_str().unwrap();
        assert!(set_cookie.starts_with("plantlens_session="));
        assert!(set_cookie.contains("HttpOnly"));

        let body: AuthResponse = response.json();
        assert_eq!(body.user.email, "fern@example.com");
        assert_eq!(body.user.auth_source, "native");
        assert!(!body.user.is_admin);
        assert_eq!(body.user.credit_balance, Some(5));
        assert_eq!(body.message, "Registration successful");

        let mut conn = pool.acquire().await.unwrap();
        let transactions = Credits::new(&mut conn)
            .list_transactions(&CreditTransactionFilter::new(Some(body.user.id), 0, 10))
            .await
            .unwrap();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].transaction_type, CreditTransactionType::SignupGrant);
        assert_eq!(transactions[0].amount, 5);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_without_initial_credits_when_zero(pool: SqlitePool) {
        let mut config = create_test_config();
        config.credits.initial_credits_for_new_users = 0;
        let server = server(pool.clone(), config);

        let response = server
            .post("/authentication/register")
            .json(&register_request("ivy@example.com", "password123"))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: AuthResponse = response.json();
        assert_eq!(body.user.credit_balance, Some(0));

        let mut conn = pool.acquire().await.unwrap();
        let count = Credits::new(&mut conn)
            .count_transactions(&CreditTransactionFilter::new(Some(body.user.id), 0, 10))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_disabled(pool: SqlitePool) {
        let mut config = create_test_config();
        config.auth.native.allow_registration = false;
        let server = server(pool, config);

        let info: RegistrationInfo = server.get("/authentication/register").await.json();
        assert!(!info.enabled);

        let response = server
            .post("/authentication/register")
            .json(&register_request("basil@example.com", "password123"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_text("User registration is disabled");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_password_too_short(pool: SqlitePool) {
        let mut config = create_test_config();
        config.auth.native.password.min_length = 10;
        let server = server(pool, config);

        let response = server
            .post("/authentication/register")
            .json(&register_request("sage@example.com", "short"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_text("Password must be at least 10 characters long");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_duplicate_email(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        server
            .post("/authentication/register")
            .json(&register_request("mint@example.com", "password123"))
            .await
            .assert_status(StatusCode::CREATED);

        let mut duplicate = register_request("MINT@example.com", "password123");
        duplicate.username = "another-mint".to_string();
        let response = server.post("/authentication/register").json(&duplicate).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        response.assert_text("An account with this email address already exists");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_register_duplicate_username(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        server
            .post("/authentication/register")
            .json(&register_request("thyme@example.com", "password123"))
            .await
            .assert_status(StatusCode::CREATED);

        let mut duplicate = register_request("thyme@other.example.com", "password123");
        duplicate.username = "thyme".to_string();
        let response = server.post("/authentication/register").json(&duplicate).await;
        response.assert_status(StatusCode::CONFLICT);
        let body: serde_json::Value = response.json();
        assert_eq!(body["message"], "This username is already taken");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_and_use_session_cookie(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        server
            .post("/authentication/register")
            .json(&register_request("rose@example.com", "password123"))
            .await
            .assert_status(StatusCode::CREATED);

        let response = server
            .post("/authentication/login")
            .json(&LoginRequest {
                email: "rose@example.com".to_string(),
                password: "password123".to_string(),
            })
            .await;
        response.assert_status_ok();
        let body: AuthResponse = response.json();
        assert!(body.user.last_login.is_some());
        assert_eq!(body.user.credit_balance, Some(5));

        let cookie = session_cookie(&response);
        let me = server.get("/api/v1/users/current").add_header("cookie", &cookie).await;
        me.assert_status_ok();
        let me: UserResponse = me.json();
        assert_eq!(me.email, "rose@example.com");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_rejects_bad_credentials(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        server
            .post("/authentication/register")
            .json(&register_request("lily@example.com", "password123"))
            .await
            .assert_status(StatusCode::CREATED);

        for (email, password) in [("lily@example.com", "wrong-password"), ("nobody@example.com", "password123")] {
            let response = server
                .post("/authentication/login")
                .json(&LoginRequest {
                    email: email.to_string(),
                    password: password.to_string(),
                })
                .await;
            response.assert_status(StatusCode::UNAUTHORIZED);
            response.assert_text("Invalid email or password");
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_logout_expires_cookie(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        let response = server.post("/authentication/logout").await;
        response.assert_status_ok();
        let set_cookie = response.header("set-cookie");
        let set_cookie = set_cookie.to_str().unwrap();
        assert!(set_cookie.starts_with("plantlens_session=;"));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_change_password(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        let registered = server
            .post("/authentication/register")
            .json(&register_request("daisy@example.com", "password123"))
            .await;
        let cookie = session_cookie(&registered);

        let wrong = server
            .post("/authentication/password-change")
            .add_header("cookie", &cookie)
            .json(&ChangePasswordRequest {
                current_password: "not-my-password".to_string(),
                new_password: "new-password-456".to_string(),
            })
            .await;
        wrong.assert_status(StatusCode::UNAUTHORIZED);

        let changed = server
            .post("/authentication/password-change")
            .add_header("cookie", &cookie)
            .json(&ChangePasswordRequest {
                current_password: "password123".to_string(),
                new_password: "new-password-456".to_string(),
            })
            .await;
        changed.assert_status_ok();

        let old_login = server
            .post("/authentication/login")
            .json(&LoginRequest {
                email: "daisy@example.com".to_string(),
                password: "password123".to_string(),
            })
            .await;
        old_login.assert_status(StatusCode::UNAUTHORIZED);

        let new_login = server
            .post("/authentication/login")
            .json(&LoginRequest {
                email: "daisy@example.com".to_string(),
                password: "new-password-456".to_string(),
            })
            .await;
        new_login.assert_status_ok();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_change_password_requires_session(pool: SqlitePool) {
        let server = server(pool, create_test_config());

        let response = server
            .post("/authentication/password-change")
            .json(&ChangePasswordRequest {
                current_password: "password123".to_string(),
                new_password: "new-password-456".to_string(),
            })
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }
}
