//! Repository implementations for database access.
//!
//! Each repository:
//! - Wraps a SQLx connection or transaction
//! - Handles query construction and parameter binding
//! - Returns domain models from [`crate::db::models`]
//!
//! # Available Repositories
//!
//! - [`Users`]: User accounts, verification state and saved sender details
//! - [`Credits`]: Balance changes and the credit ledger
//! - [`OneTimePasscodes`]: Passcodes for password reset and email change
//! - [`VerificationTokens`]: Email verification tokens
//!
//! ```ignore
//! use kemlabels::db::handlers::Users;
//!
//! async fn example(pool: &sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = pool.acquire().await?;
//!     if let Some(user) = Users::new(&mut conn).get_user_by_email("user@example.com").await? {
//!         println!("Found user: {}", user.username);
//!     }
//!     Ok(())
//! }
//! ```

pub mod credits;
pub mod tokens;
pub mod users;

pub use credits::Credits;
pub use tokens::{OneTimePasscodes, VerificationTokens};
pub use users::Users;
