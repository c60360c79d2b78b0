//! HTTP request handlers for all API endpoints.
//!
//! # Handler Modules
//!
//! - [`auth`]: Signin, signup and logout with the session cookie
//! - [`orders`]: Single and bulk label orders, saved sender details and pricing
//! - [`payments`]: Card and crypto credit purchases, webhooks and credit history
//! - [`users`]: Email verification, passcodes, password and profile changes
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the matching HTTP
//! status code and a JSON body with a stable `code` and a display `message`.

pub mod auth;
pub mod orders;
pub mod payments;
pub mod users;
