//! Database models for credit transactions.

use crate::types::{TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Credit transaction type, stored as snake_case TEXT
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    AdminGrant,
    AdminRemoval,
    SignupGrant,
    Usage,
}

impl CreditTransactionType {
    /// Whether the transaction adds to the balance (as opposed to debiting it).
    pub fn is_credit(self) -> bool {
        matches!(self, CreditTransactionType::AdminGrant | CreditTransactionType::SignupGrant)
    }
}

/// Database request for creating a new credit transaction.
///
/// `amount` is always positive; the direction comes from `transaction_type`.
#[derive(Debug, Clone)]
pub struct CreditTransactionCreateDBRequest {
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub description: Option<String>,
}

impl CreditTransactionCreateDBRequest {
    pub fn signup_grant(user_id: UserId, amount: i64) -> Self {
        Self {
            user_id,
            transaction_type: CreditTransactionType::SignupGrant,
            amount,
            description: Some("Initial credits on registration".to_string()),
        }
    }

    pub fn usage(user_id: UserId, amount: i64, description: String) -> Self {
        Self {
            user_id,
            transaction_type: CreditTransactionType::Usage,
            amount,
            description: Some(description),
        }
    }
}

/// Database response for a credit transaction
#[derive(Debug, Clone)]
pub struct CreditTransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
