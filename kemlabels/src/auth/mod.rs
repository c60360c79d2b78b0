//! Authentication for the web client.
//!
//! Browser sessions are HS256 JWTs in an HTTP-only cookie:
//! - Users sign in via `/auth/signin` or `/auth/signup` and receive the cookie
//! - `/auth/logout` expires it
//! - Handlers take [`current_user::VerifiedUser`] when the route needs a
//!   verified email, or [`CurrentUser`](crate::api::models::users::CurrentUser) otherwise
//!
//! Password reset is a two step flow. `/user/forgotPassword` mails a 4-digit
//! passcode; `/user/validateOtp` exchanges it for a short-lived reset grant; the
//! grant is then spent on `/user/updatePassword`.
//!
//! # Modules
//!
//! - [`current_user`]: Extractors for getting the authenticated user in handlers
//! - [`password`]: Password hashing and verification using Argon2
//! - [`session`]: Session token and reset grant signing
//! - [`tokens`]: Passcode and verification token generation

pub mod current_user;
pub mod password;
pub mod session;
pub mod tokens;
