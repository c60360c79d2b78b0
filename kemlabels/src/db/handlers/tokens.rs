//! Database repositories for one-time passcodes and verification tokens.

use crate::db::{errors::Result, models::tokens::{OneTimePasscode, VerificationToken}};
use crate::types::{UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct PasscodeRow {
    pub email: String,
    pub code: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

impl From<PasscodeRow> for OneTimePasscode {
    fn from(row: PasscodeRow) -> Self {
        Self {
            email: row.email,
            code: row.code,
            attempts: row.attempts,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct VerificationRow {
    pub user_id: UserId,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<VerificationRow> for VerificationToken {
    fn from(row: VerificationRow) -> Self {
        Self {
            user_id: row.user_id,
            token_hash: row.token_hash,
            created_at: row.created_at,
        }
    }
}

pub struct OneTimePasscodes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> OneTimePasscodes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Upsert keyed on email so only the newest code survives
    #[instrument(skip_all, err)]
    pub async fn replace(&mut self, email: &str, code: &str) -> Result<OneTimePasscode> {
        let row = sqlx::query_as::<_, PasscodeRow>(
            r#"
            INSERT INTO one_time_passcodes (email, code, attempts, created_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (email) DO UPDATE SET code = EXCLUDED.code, attempts = 0, created_at = EXCLUDED.created_at
            RETURNING email, code, attempts, created_at
            "#,
        )
        .bind(email)
        .bind(code)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row.into())
    }

    #[instrument(skip_all, err)]
    pub async fn get(&mut self, email: &str) -> Result<Option<OneTimePasscode>> {
        let row = sqlx::query_as::<_, PasscodeRow>("SELECT email, code, attempts, created_at FROM one_time_passcodes WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip_all, err)]
    pub async fn record_failure(&mut self, email: &str) -> Result<Option<i32>> {
        let attempts = sqlx::query_scalar::<_, i32>(
            "UPDATE one_time_passcodes SET attempts = attempts + 1 WHERE email = $1 RETURNING attempts",
        )
        .bind(email)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(attempts)
    }

    #[instrument(skip_all, err)]
    pub async fn delete(&mut self, email: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM one_time_passcodes WHERE email = $1")
            .bind(email)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM one_time_passcodes WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct VerificationTokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> VerificationTokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, token_hash), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn replace(&mut self, user_id: UserId, token_hash: &str) -> Result<VerificationToken> {
        let row = sqlx::query_as::<_, VerificationRow>(
            r#"
            INSERT INTO verification_tokens (user_id, token_hash, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET token_hash = EXCLUDED.token_hash, created_at = EXCLUDED.created_at
            RETURNING user_id, token_hash, created_at
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get(&mut self, user_id: UserId) -> Result<Option<VerificationToken>> {
        let row = sqlx::query_as::<_, VerificationRow>(
            "SELECT user_id, token_hash, created_at FROM verification_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn delete(&mut self, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn delete_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE created_at < $1")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
