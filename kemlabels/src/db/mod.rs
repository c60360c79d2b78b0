//! Database layer for data persistence and access.
//!
//! Request handlers and services talk to a [`Database`] trait object. Two
//! implementations exist:
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, order service, webhooks, cleanup jobs)
//! └──────┬──────┘
//!        │ Arc<dyn Database>
//!        ↓
//! ┌────────────────────────────┐
//! │ PgDatabase     │ MemoryDb  │
//! └──────┬─────────┴───────────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - one per table, over a PgConnection)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations over `PgConnection`
//! - [`models`]: Database record structures
//! - [`errors`]: Database-specific error types
//! - [`postgres`]: [`Database`] backed by a PostgreSQL pool
//! - [`memory`]: [`Database`] held in process memory, for development and tests
//!
//! # Credit invariants
//!
//! A balance never goes negative: [`Database::debit_credits`] checks and decrements in
//! one atomic step and leaves the balance untouched when it does not cover the amount.
//! Payment credits are keyed by a provider source id and applied at most once.

pub mod errors;
pub mod handlers;
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::UserId;
use errors::Result;
use models::{
    credits::{CreditDebitRequest, CreditOutcome, CreditTransactionDBResponse, DebitOutcome, PaymentCreditRequest},
    tokens::{OneTimePasscode, VerificationToken},
    users::{ContactDetails, UserCreateDBRequest, UserDBResponse},
};

pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;

/// Persistence for users, the credit ledger and short-lived tokens.
///
/// Emails are compared exactly; callers normalize them before storing or looking up.
#[async_trait]
pub trait Database: Send + Sync {
    /// Create an unverified user with zero credits.
    ///
    /// Fails with a unique violation on `users_email_key` or `users_username_key`.
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse>;
    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>>;
    async fn mark_user_verified(&self, id: UserId) -> Result<()>;
    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()>;
    async fn update_username(&self, id: UserId, username: &str) -> Result<UserDBResponse>;
    async fn update_email(&self, id: UserId, email: &str) -> Result<UserDBResponse>;
    /// Overwrite the saved sender details
    async fn save_sender_info(&self, id: UserId, sender: &ContactDetails) -> Result<()>;
    /// Delete unverified users created before `cutoff`, returning how many were removed.
    async fn delete_unverified_users_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Atomically take `amount` from the balance if it covers it, recording a ledger entry.
    async fn debit_credits(&self, request: &CreditDebitRequest) -> Result<DebitOutcome>;
    /// Add credits for a payment unless its source id was already applied.
    async fn apply_payment_credit(&self, request: &PaymentCreditRequest) -> Result<CreditOutcome>;
    /// Ledger entries for a user, newest first.
    async fn list_credit_transactions(&self, user_id: UserId, limit: i64) -> Result<Vec<CreditTransactionDBResponse>>;

    /// Store a new passcode for `email`, replacing any existing one.
    async fn replace_otp(&self, email: &str, code: &str) -> Result<OneTimePasscode>;
    async fn get_otp(&self, email: &str) -> Result<Option<OneTimePasscode>>;
    /// Count a wrong guess against the passcode for `email`, returning the new total.
    /// `None` when no passcode exists.
    async fn record_otp_failure(&self, email: &str) -> Result<Option<i32>>;
    async fn delete_otp(&self, email: &str) -> Result<bool>;
    async fn delete_expired_otps(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Store a new verification token hash for the user, replacing any existing one.
    async fn replace_verification_token(&self, user_id: UserId, token_hash: &str) -> Result<VerificationToken>;
    async fn get_verification_token(&self, user_id: UserId) -> Result<Option<VerificationToken>>;
    async fn delete_verification_token(&self, user_id: UserId) -> Result<bool>;
    async fn delete_expired_verification_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Release connections on shutdown
    async fn close(&self) {}
}
