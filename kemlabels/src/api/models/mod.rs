//! API request and response data models.
//!
//! API models are kept apart from the database records in [`crate::db::models`] so
//! the stored shape can change without changing the public contract. Every model is
//! annotated with `utoipa` for the OpenAPI document.
//!
//! - [`auth`]: sign-in and sign-up payloads, session cookie responses
//! - [`users`]: the session user, profile and account-maintenance payloads
//! - [`orders`]: sender details and pricing responses
//! - [`payments`]: credit purchases, webhook acknowledgements and credit history

pub mod auth;
pub mod orders;
pub mod payments;
pub mod users;
