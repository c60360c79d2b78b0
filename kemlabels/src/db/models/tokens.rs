//! Database models for one-time passcodes and email verification tokens.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::UserId;

/// A 4-digit passcode mailed to an address. At most one exists per email.
#[derive(Debug, Clone, PartialEq)]
pub struct OneTimePasscode {
    pub email: String,
    pub code: String,
    /// Wrong guesses made against this code
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// An email verification token. At most one exists per user; only its hash is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationToken {
    pub user_id: UserId,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
}

/// True once `ttl` has elapsed since `created_at`
pub fn is_expired(created_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now >= created_at + ttl,
        Err(_) => false,
    }
}

impl OneTimePasscode {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_expired(self.created_at, ttl, now)
    }
}

impl VerificationToken {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_expired(self.created_at, ttl, now)
    }
}
