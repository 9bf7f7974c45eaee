//! Database repository for the credit ledger.
//!
//! Every change to a balance is an appended row; the newest row per user carries the running
//! balance in `balance_after`.

use crate::db::{
    errors::{DbError, Result},
    models::credits::{CreditTransactionCreateDBRequest, CreditTransactionDBResponse, CreditTransactionType},
};
use crate::types::{TransactionId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, SqliteConnection};
use tracing::instrument;

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, amount, balance_after, description, created_at";

/// Filter for listing credit transactions
#[derive(Debug, Clone)]
pub struct CreditTransactionFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}

impl CreditTransactionFilter {
    pub fn new(user_id: Option<UserId>, skip: i64, limit: i64) -> Self {
        Self { user_id, skip, limit }
    }
}

// Database entity model for credit transaction
#[derive(Debug, Clone, FromRow)]
struct CreditTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransaction> for CreditTransactionDBResponse {
    fn from(tx: CreditTransaction) -> Self {
        Self {
            id: tx.id,
            user_id: tx.user_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            balance_after: tx.balance_after,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

pub struct Credits<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Append a transaction, computing the new running balance.
    ///
    /// Debits that would take the balance below zero fail with
    /// [`DbError::InsufficientBalance`] and write nothing. Call it on a transaction opened with
    /// [`crate::db::begin_write`] when other writers may be active, so the balance read and the
    /// insert happen under one write lock.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), transaction_type = ?request.transaction_type, amount = request.amount), err)]
    pub async fn create_transaction(&mut self, request: &CreditTransactionCreateDBRequest) -> Result<CreditTransactionDBResponse> {
        let mut tx = self.db.begin().await?;

        let current_balance = Self::current_balance(&mut tx, request.user_id).await?;
        let balance_after = if request.transaction_type.is_credit() {
            current_balance + request.amount
        } else {
            current_balance - request.amount
        };

        if balance_after < 0 {
            return Err(DbError::InsufficientBalance {
                balance: current_balance,
                required: request.amount,
            });
        }

        let transaction = sqlx::query_as::<_, CreditTransaction>(&format!(
            "INSERT INTO credit_transactions (user_id, transaction_type, amount, balance_after, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(request.user_id)
        .bind(request.transaction_type)
        .bind(request.amount)
        .bind(balance_after)
        .bind(&request.description)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(transaction.into())
    }

    /// Get current balance for a user (latest balance_after from credit_transactions)
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_user_balance(&mut self, user_id: UserId) -> Result<i64> {
        Self::current_balance(&mut *self.db, user_id).await
    }

    async fn current_balance(conn: &mut SqliteConnection, user_id: UserId) -> Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT balance_after FROM credit_transactions WHERE user_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(conn)
        .await?;

        Ok(balance.unwrap_or(0))
    }

    #[instrument(skip(self), err)]
    pub async fn get_transaction_by_id(&mut self, id: TransactionId) -> Result<Option<CreditTransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, CreditTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(transaction.map(Into::into))
    }

    /// List transactions newest first, optionally restricted to one user
    #[instrument(skip(self, filter), fields(skip = filter.skip, limit = filter.limit), err)]
    pub async fn list_transactions(&mut self, filter: &CreditTransactionFilter) -> Result<Vec<CreditTransactionDBResponse>> {
        let transactions = sqlx::query_as::<_, CreditTransaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM credit_transactions
             WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY id DESC
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(filter.user_id)
        .bind(filter.limit)
        .bind(filter.skip)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(transactions.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, filter), err)]
    pub async fn count_transactions(&mut self, filter: &CreditTransactionFilter) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM credit_transactions WHERE (?1 IS NULL OR user_id = ?1)")
            .bind(filter.user_id)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_user;
    use sqlx::SqlitePool;

    fn grant(user_id: UserId, amount: i64) -> CreditTransactionCreateDBRequest {
        CreditTransactionCreateDBRequest {
            user_id,
            transaction_type: CreditTransactionType::AdminGrant,
            amount,
            description: Some("test grant".to_string()),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_balance_starts_at_zero(pool: SqlitePool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        assert_eq!(credits.get_user_balance(user.id).await.unwrap(), 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_running_balance(pool: SqlitePool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        let first = credits.create_transaction(&grant(user.id, 10)).await.unwrap();
        assert_eq!(first.balance_after, 10);
        assert_eq!(first.transaction_type, CreditTransactionType::AdminGrant);

        let usage = credits
            .create_transaction(&CreditTransactionCreateDBRequest::usage(user.id, 3, "analysis".to_string()))
            .await
            .unwrap();
        assert_eq!(usage.balance_after, 7);
        assert_eq!(usage.amount, 3);

        let signup = credits
            .create_transaction(&CreditTransactionCreateDBRequest::signup_grant(user.id, 5))
            .await
            .unwrap();
        assert_eq!(signup.balance_after, 12);

        assert_eq!(credits.get_user_balance(user.id).await.unwrap(), 12);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_debit_cannot_go_negative(pool: SqlitePool) {
        let user = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        credits.create_transaction(&grant(user.id, 2)).await.unwrap();

        let removal = CreditTransactionCreateDBRequest {
            user_id: user.id,
            transaction_type: CreditTransactionType::AdminRemoval,
            amount: 3,
            description: None,
        };
        match credits.create_transaction(&removal).await {
            Err(DbError::InsufficientBalance { balance, required }) => {
                assert_eq!(balance, 2);
                assert_eq!(required, 3);
            }
            other => panic!("expected insufficient balance, got {other:?}"),
        }

        // Nothing was written
        assert_eq!(credits.get_user_balance(user.id).await.unwrap(), 2);
        let filter = CreditTransactionFilter::new(Some(user.id), 0, 10);
        assert_eq!(credits.count_transactions(&filter).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_and_filter_transactions(pool: SqlitePool) {
        let alice = create_test_user(&pool).await;
        let bob = create_test_user(&pool).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut credits = Credits::new(&mut conn);

        for amount in 1..=3 {
            credits.create_transaction(&grant(alice.id, amount)).await.unwrap();
        }
        let bobs = credits.create_transaction(&grant(bob.id, 100)).await.unwrap();

        let alice_filter = CreditTransactionFilter::new(Some(alice.id), 0, 10);
        let alice_txs = credits.list_transactions(&alice_filter).await.unwrap();
        assert_eq!(alice_txs.len(), 3);
        // Newest first
        assert_eq!(alice_txs[0].amount, 3);
        assert_eq!(alice_txs[0].balance_after, 6);
        assert!(alice_txs.iter().all(|t| t.user_id == alice.id));
        assert_eq!(credits.count_transactions(&alice_filter).await.unwrap(), 3);

        let all = CreditTransactionFilter::new(None, 0, 10);
        assert_eq!(credits.list_transactions(&all).await.unwrap().len(), 4);
        assert_eq!(credits.count_transactions(&all).await.unwrap(), 4);

        let page = CreditTransactionFilter::new(None, 1, 2);
        let page_txs = credits.list_transactions(&page).await.unwrap();
        assert_eq!(page_txs.len(), 2);
        assert_eq!(page_txs[0].amount, 3);

        let found = credits.get_transaction_by_id(bobs.id).await.unwrap().unwrap();
        assert_eq!(found.user_id, bob.id);
        assert!(credits.get_transaction_by_id(9999).await.unwrap().is_none());
    }
}
