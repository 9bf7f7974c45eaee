//! OpenAPI documentation.
//!
//! [`ApiDoc`] covers the authentication routes at the root and nests [`ApiV1Doc`] under
//! `/api/v1`. It is served as JSON at `/api-docs/openapi.json` and rendered by Scalar at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, config::DEFAULT_SESSION_COOKIE_NAME};

/// Registers the two ways of presenting a session token.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "BearerAuth".to_string(),
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some(
                        "Session token returned by login or registration. Include it in the `Authorization` header:\n\n\
                        ```\nAuthorization: Bearer YOUR_TOKEN\n```",
                    ))
                    .build(),
            ),
        );
        components.security_schemes.insert(
            "CookieAuth".to_string(),
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                DEFAULT_SESSION_COOKIE_NAME,
                "Session cookie set by login or registration. Takes precedence over the `Authorization` header.",
            ))),
        );
    }
}

/// Resource API served under `/api/v1`.
#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::users::list_users,
        api::handlers::users::get_user,
        api::handlers::credits::get_user_balance,
        api::handlers::transactions::create_transaction,
        api::handlers::transactions::get_transaction,
        api::handlers::transactions::list_transactions,
        api::handlers::analyses::create_analysis,
        api::handlers::analyses::list_analyses,
        api::handlers::analyses::get_analysis,
        api::handlers::analyses::get_analysis_image,
    ),
    components(
        schemas(
            api::models::users::UserResponse,
            api::models::credits::UserBalanceResponse,
            api::models::transactions::TransactionType,
            api::models::transactions::CreditTransactionCreate,
            api::models::transactions::CreditTransactionResponse,
            api::models::analyses::AnalysisUpload,
            api::models::analyses::AnalysisResponse,
            api::models::analyses::AnalysisSummary,
            api::models::analyses::AnalysisDetail,
            crate::analysis::AnalysisResult,
        )
    )
)]
pub struct ApiV1Doc;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "plantlens",
        description = "Identify plants from photos and get a care card for each one. Every analysis costs credits and is kept in your history."
    ),
    modifiers(&SecurityAddon),
    nest(
        (path = "/api/v1", api = ApiV1Doc)
    ),
    paths(
        api::handlers::auth::get_registration_info,
        api::handlers::auth::register,
        api::handlers::auth::get_login_info,
        api::handlers::auth::login,
        api::handlers::auth::logout,
        api::handlers::auth::change_password,
    ),
    components(
        schemas(
            api::models::auth::RegistrationInfo,
            api::models::auth::LoginInfo,
            api::models::auth::RegisterRequest,
            api::models::auth::LoginRequest,
            api::models::auth::ChangePasswordRequest,
            api::models::auth::AuthResponse,
            api::models::auth::AuthSuccessResponse,
        )
    ),
    tags(
        (name = "authentication", description = "Register, log in and manage your password. Login sets a session cookie and returns the same token for use as a Bearer token."),
        (name = "users", description = "User profiles. Use `current` in place of an ID for your own account."),
        (name = "credits", description = "Credit balances."),
        (name = "transactions", description = "The credit ledger. Grants and removals are admin-only; analysis charges appear as `usage`."),
        (name = "analyses", description = "Plant photo analysis and history."),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_paths_and_security_schemes() {
        let doc = ApiDoc::openapi();

        assert!(doc.paths.paths.contains_key("/api/v1/analyses/{analysis_id}/image"));
        assert!(doc.paths.paths.contains_key("/api/v1/users/{user_id}/balance"));
        assert!(doc.paths.paths.contains_key("/authentication/register"));
        assert!(!doc.paths.paths.contains_key("/analyses"));

        let components = doc.components.expect("components are generated");
        assert!(components.security_schemes.contains_key("BearerAuth"));
        assert!(components.security_schemes.contains_key("CookieAuth"));
        assert!(components.schemas.contains_key("AnalysisDetail"));
    }
}
