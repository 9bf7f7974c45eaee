//! HTTP handlers for credit transaction endpoints.

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        transactions::{CreditTransactionCreate, CreditTransactionResponse, ListTransactionsQuery},
        users::CurrentUser,
    },
    auth::permissions::{self, RequiresPermission, operation, resource},
    db::{
        self,
        errors::DbError,
        handlers::{Credits, credits::CreditTransactionFilter},
        models::credits::CreditTransactionCreateDBRequest,
    },
    errors::{Error, Result},
    types::{Operation, Permission, Resource, TransactionId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

/// Create a new credit transaction
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    summary = "Create a credit transaction",
    description = "Grant or remove credits (admin only). Removals may not take the balance below zero.",
    request_body = CreditTransactionCreate,
    responses(
        (status = 201, description = "Transaction created successfully", body = CreditTransactionResponse),
        (status = 400, description = "Bad request - invalid amount, unknown user or insufficient balance"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admin only"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_transaction(
    State(state): State<AppState>,
    _perm: RequiresPermission<resource::Credits, operation::CreateAll>,
    Json(data): Json<CreditTransactionCreate>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    if data.amount <= 0 {
        return Err(Error::BadRequest {
            message: "Amount must be greater than zero".to_string(),
        });
    }

    let mut tx = db::begin_write(&state.db).await?;
    let mut repo = Credits::new(&mut tx);

    let db_request = CreditTransactionCreateDBRequest {
        user_id: data.user_id,
        transaction_type: data.transaction_type.into(),
        amount: data.amount,
        description: data.description,
    };

    let transaction = repo.create_transaction(&db_request).await.map_err(|e| match e {
        DbError::InsufficientBalance { balance, required } => Error::BadRequest {
            message: format!("Insufficient credits: current balance is {balance}, cannot remove {required}"),
        },
        other => other.into(),
    })?;
    tx.commit().await.map_err(DbError::from)?;

    Ok((StatusCode::CREATED, Json(CreditTransactionResponse::from(transaction))))
}

/// Get a specific transaction by ID
#[utoipa::path(
    get,
    path = "/transactions/{transaction_id}",
    tag = "transactions",
    summary = "Get a specific transaction",
    description = "Non-admin users can only access their own transactions.",
    params(
        ("transaction_id" = i64, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction details", body = CreditTransactionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    current_user: CurrentUser,
) -> Result<Json<CreditTransactionResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut repo = Credits::new(&mut pool_conn);

    let not_found = || Error::NotFound {
        resource: "Transaction".to_string(),
        id: transaction_id.to_string(),
    };

    let transaction = repo.get_transaction_by_id(transaction_id).await?.ok_or_else(not_found)?;

    // 404 rather than 403 so other users' transaction ids are not revealed
    if !permissions::can_read(&current_user, Resource::Credits, transaction.user_id) {
        return Err(not_found());
    }

    Ok(Json(CreditTransactionResponse::from(transaction)))
}

/// List credit transactions
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    summary = "List credit transactions",
    description = "Newest first. Non-admin users see their own transactions; admins see everyone's, optionally filtered by `user_id`.",
    params(
        ListTransactionsQuery
    ),
    responses(
        (status = 200, description = "Paginated list of transactions", body = PaginatedResponse<CreditTransactionResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - cannot access other users' transactions"),
    ),
    security(
        ("BearerAuth" = []),
        ("CookieAuth" = [])
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<CreditTransactionResponse>>> {
    let (skip, limit) = query.pagination.params();

    let has_read_all = permissions::can_read_all_resources(&current_user, Resource::Credits);

    let filter_user_id = match query.user_id {
        Some(requested) if !has_read_all && requested != current_user.id => {
            return Err(Error::InsufficientPermissions {
                required: Permission::Allow(Resource::Credits, Operation::ReadAll),
                action: Operation::ReadAll,
                resource: "transactions".to_string(),
            });
        }
        Some(requested) => Some(requested),
        None if has_read_all => None,
        None => Some(current_user.id),
    };

    let filter = CreditTransactionFilter::new(filter_user_id, skip, limit);

    let mut pool_conn = state.db.acquire().await.map_err(DbError::from)?;
    let mut repo = Credits::new(&mut pool_conn);

    let transactions = repo.list_transactions(&filter).await?;
    let total_count = repo.count_transactions(&filter).await?;

    let data = transactions.into_iter().map(CreditTransactionResponse::from).collect();
    Ok(Json(PaginatedResponse::new(data, total_count, skip, limit)))
}
