use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    config::Config,
    db::{
        errors::DbError,
        handlers::{Repository, Users},
    },
    errors::{Error, Result},
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use tracing::{debug, instrument, trace};

/// Find the session token in the request.
///
/// The session cookie wins over an `Authorization: Bearer` header. Returns `None` when neither is
/// present.
fn session_token<'a>(parts: &'a Parts, config: &Config) -> Option<&'a str> {
    let cookie_name = &config.auth.native.session.cookie_name;

    let from_cookie = parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name.as_str() && !value.is_empty())
        .map(|(_, value)| value);

    from_cookie.or_else(|| {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if !state.config.auth.native.enabled {
            return Err(Error::Unauthenticated { message: None });
        }

        let Some(token) = session_token(parts, &state.config) else {
            trace!("No session credentials found in request");
            return Err(Error::Unauthenticated { message: None });
        };

        let claimed = session::verify_session_token(token, &state.config)?;

        // Tokens outlive accounts; the database has the final say
        let mut conn = state.db.acquire().await.map_err(DbError::from)?;
        let user = Users::new(&mut conn).get_by_id(claimed.id).await?.ok_or_else(|| {
            debug!("Session token refers to a user that no longer exists");
            Error::Unauthenticated { message: None }
        })?;

        debug!("Authenticated session for user {}", crate::types::abbrev_uuid(&user.id));
        Ok(CurrentUser::from(user))
    }
}
