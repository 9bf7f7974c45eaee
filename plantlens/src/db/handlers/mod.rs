//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed [`sqlx::SqliteConnection`] (a pooled connection or an open
//! transaction) and exposes strongly-typed operations that return the models in
//! [`crate::db::models`].
//!
//! - [`Users`]: accounts and login bookkeeping, implements [`Repository`]
//! - [`Credits`]: the append-only credit ledger
//! - [`Analyses`]: analysis history and stored images
//!
//! ```ignore
//! use plantlens::db::handlers::{Repository, Users};
//!
//! let mut tx = pool.begin().await?;
//! let user = Users::new(&mut tx).get_by_id(id).await?;
//! tx.commit().await?;
//! ```

pub mod analyses;
pub mod credits;
pub mod repository;
pub mod users;

pub use analyses::Analyses;
pub use credits::Credits;
pub use repository::Repository;
pub use users::Users;
