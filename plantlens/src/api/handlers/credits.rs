use crate::{
    AppState,
    api::models::{credits::UserBalanceResponse, users::CurrentUser},
    auth::permissions,
    db::{errors::DbError, handlers::Credits},
    errors::{Error, Result},
    types::{Operation, Permission, Resource, UserIdOrCurrent},
};
use axum::{
    extract::{Path, State},
    response::Json,
};

/// Get a user's credit balance
#[utoipa::path(
    get,
    path = "/users/{user_id}/balance",
    tag = "credits",
    summary = "Get credit balance",
    description = "The balance is the running total of the user's credit ledger. Users may read their own; admins may read anyone's.",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or `current`"),
    ),
    responses(
        (status = 200, description = "Current balance", body = UserBalanceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not your account"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_user_balance(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    current_user: CurrentUser,
) -> Result<Json<UserBalanceResponse>> {
    let user_id = user_id.resolve(current_user.id);

    if !permissions::can_read(&current_user, Resource::Credits, user_id) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Allow(Resource::Credits, Operation::ReadAll),
            action: Operation::ReadAll,
            resource: "credits".to_string(),
        });
    }

    let mut conn = state.db.acquire().await.map_err(DbError::from)?;
    let balance = Credits::new(&mut conn).get_user_balance(user_id).await?;

    Ok(Json(UserBalanceResponse { user_id, balance }))
}
