//! API request and response data models.
//!
//! These structures define the public JSON contract. They are kept separate from the database
//! records in [`crate::db::models`] so that storage and wire formats can change independently,
//! and are annotated with `utoipa` for the generated API docs.
//!
//! - [`auth`]: login, registration and password change payloads
//! - [`users`]: user profiles and the authenticated [`users::CurrentUser`]
//! - [`credits`], [`transactions`]: balances and the credit ledger
//! - [`analyses`]: analysis results and history
//! - [`pagination`]: shared `skip`/`limit` handling

pub mod analyses;
pub mod auth;
pub mod credits;
pub mod pagination;
pub mod transactions;
pub mod users;
