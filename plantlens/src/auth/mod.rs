//! Authentication and authorization.
//!
//! Native username/password accounts only. A successful login or registration issues an HS256
//! JWT signed with `secret_key`; it is delivered as an HTTP-only cookie and may also be sent back
//! as `Authorization: Bearer <token>`. Every authenticated request re-reads the user from the
//! database, so deleted accounts and admin changes take effect immediately.
//!
//! - [`current_user`]: the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor
//! - [`password`]: Argon2id hashing, verification and length rules
//! - [`permissions`]: admin and ownership checks
//! - [`session`]: token and cookie construction
//!
//! ```ignore
//! async fn handler(current_user: CurrentUser) -> Result<String, Error> {
//!     Ok(format!("Hello, {}!", current_user.username))
//! }
//! ```

pub mod current_user;
pub mod password;
pub mod permissions;
pub mod session;
