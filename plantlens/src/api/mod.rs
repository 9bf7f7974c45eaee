//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Authentication** (`/authentication/*`): registration, login, logout, password change
//! - **Users** (`/api/v1/users/*`): profiles and balances
//! - **Transactions** (`/api/v1/transactions/*`): the credit ledger
//! - **Analyses** (`/api/v1/analyses/*`): plant photo analysis and history
//!
//! # OpenAPI Documentation
//!
//! Endpoints are annotated with `utoipa`. The generated document is served at
//! `/api-docs/openapi.json` and browsable at `/docs`.

pub mod handlers;
pub mod models;
