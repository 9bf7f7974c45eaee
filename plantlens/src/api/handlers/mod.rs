//! HTTP request handlers for all API endpoints.
//!
//! Handlers are grouped by resource. Each one authenticates through an extractor
//! ([`crate::api::models::users::CurrentUser`] or [`crate::auth::permissions::RequiresPermission`]),
//! talks to the database through the repositories in [`crate::db::handlers`], and returns
//! [`crate::errors::Error`] on failure, which renders as a status code and message.
//!
//! - [`analyses`]: photo upload and analysis, history, stored images
//! - [`auth`]: registration, login, logout and password change
//! - [`credits`]: balances
//! - [`transactions`]: the credit ledger
//! - [`users`]: user profiles

pub mod analyses;
pub mod auth;
pub mod credits;
pub mod transactions;
pub mod users;
