//! Database layer for data persistence and access.
//!
//! Uses SQLx over SQLite. Schema migrations live in `migrations/` and are applied at startup
//! through [`crate::migrator`].
//!
//! ```text
//! API handlers -> db::handlers (repositories) -> db::models -> SQLite
//! ```
//!
//! Writes that must be atomic (registration with its signup grant, an analysis with its credit
//! debit) open a transaction with [`begin_write`] and build several repositories on it in turn.

pub mod errors;
pub mod handlers;
pub mod models;

use sqlx::{Sqlite, SqlitePool, Transaction};

use errors::DbError;

/// Open a transaction that holds the database write lock from its first statement.
///
/// A deferred transaction that reads the ledger and then writes has to upgrade its lock, and
/// SQLite fails that upgrade with `SQLITE_BUSY` straight away when another writer got there
/// first. `BEGIN IMMEDIATE` takes the lock up front, so concurrent writers queue on the
/// connection's busy timeout instead.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, DbError> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
