//! [`Database`] over a PostgreSQL pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::info;

use super::{
    Database,
    errors::Result,
    handlers::{Credits, OneTimePasscodes, Users, VerificationTokens},
    models::{
        credits::{CreditDebitRequest, CreditOutcome, CreditTransactionDBResponse, DebitOutcome, PaymentCreditRequest},
        tokens::{OneTimePasscode, VerificationToken},
        users::{ContactDetails, UserCreateDBRequest, UserDBResponse},
    },
};
use crate::{config::PoolSettings, types::UserId};

/// Get the kemlabels database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn optional_duration(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[derive(Clone, Debug)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with the configured limits and run pending migrations
    pub async fn connect(url: &str, settings: &PoolSettings) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .idle_timeout(optional_duration(settings.idle_timeout_secs))
            .max_lifetime(optional_duration(settings.max_lifetime_secs))
            .connect(url)
            .await?;
        migrator().run(&pool).await?;
        info!(max_connections = settings.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn create_user(&self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).create(request).await
    }

    async fn get_user_by_id(&self, id: UserId) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_by_id(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_user_by_email(email).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).get_user_by_username(username).await
    }

    async fn mark_user_verified(&self, id: UserId) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).mark_verified(id).await
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).update_password(id, password_hash).await
    }

    async fn update_username(&self, id: UserId, username: &str) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).update_username(id, username).await
    }

    async fn update_email(&self, id: UserId, email: &str) -> Result<UserDBResponse> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).update_email(id, email).await
    }

    async fn save_sender_info(&self, id: UserId, sender: &ContactDetails) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).save_sender_info(id, sender).await
    }

    async fn delete_unverified_users_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        Users::new(&mut conn).delete_unverified_before(cutoff).await
    }

    async fn debit_credits(&self, request: &CreditDebitRequest) -> Result<DebitOutcome> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).debit(request).await
    }

    async fn apply_payment_credit(&self, request: &PaymentCreditRequest) -> Result<CreditOutcome> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).apply_payment(request).await
    }

    async fn list_credit_transactions(&self, user_id: UserId, limit: i64) -> Result<Vec<CreditTransactionDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        Credits::new(&mut conn).list_for_user(user_id, limit).await
    }

    async fn replace_otp(&self, email: &str, code: &str) -> Result<OneTimePasscode> {
        let mut conn = self.pool.acquire().await?;
        OneTimePasscodes::new(&mut conn).replace(email, code).await
    }

    async fn get_otp(&self, email: &str) -> Result<Option<OneTimePasscode>> {
        let mut conn = self.pool.acquire().await?;
        OneTimePasscodes::new(&mut conn).get(email).await
    }

    async fn record_otp_failure(&self, email: &str) -> Result<Option<i32>> {
        let mut conn = self.pool.acquire().await?;
        OneTimePasscodes::new(&mut conn).record_failure(email).await
    }

    async fn delete_otp(&self, email: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        OneTimePasscodes::new(&mut conn).delete(email).await
    }

    async fn delete_expired_otps(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        OneTimePasscodes::new(&mut conn).delete_created_before(cutoff).await
    }

    async fn replace_verification_token(&self, user_id: UserId, token_hash: &str) -> Result<VerificationToken> {
        let mut conn = self.pool.acquire().await?;
        VerificationTokens::new(&mut conn).replace(user_id, token_hash).await
    }

    async fn get_verification_token(&self, user_id: UserId) -> Result<Option<VerificationToken>> {
        let mut conn = self.pool.acquire().await?;
        VerificationTokens::new(&mut conn).get(user_id).await
    }

    async fn delete_verification_token(&self, user_id: UserId) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        VerificationTokens::new(&mut conn).delete(user_id).await
    }

    async fn delete_expired_verification_tokens(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        VerificationTokens::new(&mut conn).delete_created_before(cutoff).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        errors::DbError,
        handlers::credits::SOURCE_ID_CONSTRAINT,
        models::credits::CreditTransactionType,
    };
    use chrono::TimeDelta;
    use rust_decimal::Decimal;
    use std::sync::Arc;

    fn dec(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    async fn create_user(db: &PgDatabase, name: &str) -> UserDBResponse {
        db.create_user(&UserCreateDBRequest {
            username: name.to_string(),
            email: format!("{name}@example.com"),
            password_hash: "hash".to_string(),
        })
        .await
        .unwrap()
    }

    fn payment(user_id: UserId, amount: &str, source_id: &str) -> PaymentCreditRequest {
        PaymentCreditRequest {
            user_id,
            transaction_type: CreditTransactionType::CardPayment,
            amount: dec(amount),
            source_id: source_id.to_string(),
            description: None,
        }
    }

    fn debit(user_id: UserId, amount: &str) -> CreditDebitRequest {
        CreditDebitRequest {
            user_id,
            amount: dec(amount),
            description: "Label".to_string(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_username_and_email(pool: PgPool) {
        let db = PgDatabase::new(pool);
        create_user(&db, "jane").await;

        let err = db
            .create_user(&UserCreateDBRequest {
                username: "jane".to_string(),
                email: "other@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("users_username_key"), "{err:?}");

        let err = db
            .create_user(&UserCreateDBRequest {
                username: "other".to_string(),
                email: "jane@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("users_email_key"), "{err:?}");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_debit_is_conditional(pool: PgPool) {
        let db = PgDatabase::new(pool);
        let user = create_user(&db, "jane").await;
        db.apply_payment_credit(&payment(user.id, "10.00", "stripe:pi_1")).await.unwrap();

        assert_eq!(
            db.debit_credits(&debit(user.id, "4.00")).await.unwrap(),
            DebitOutcome::Debited { balance_after: dec("6.00") }
        );
        assert_eq!(
            db.debit_credits(&debit(user.id, "7.00")).await.unwrap(),
            DebitOutcome::Insufficient { available: dec("6.00") }
        );
        assert_eq!(
            db.debit_credits(&debit(user.id, "6.00")).await.unwrap(),
            DebitOutcome::Debited { balance_after: Decimal::ZERO }
        );

        let history = db.list_credit_transactions(user.id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].transaction_type, CreditTransactionType::LabelPurchase);
        assert_eq!(history[0].balance_after, Decimal::ZERO);

        let err = db.debit_credits(&debit(uuid::Uuid::new_v4(), "1.00")).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_debits_never_overdraw(pool: PgPool) {
        let db = Arc::new(PgDatabase::new(pool));
        let user = create_user(&db, "jane").await;
        db.apply_payment_credit(&payment(user.id, "10.00", "stripe:pi_1")).await.unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.debit_credits(&debit(user.id, "3.00")).await.unwrap() })
            })
            .collect();

        let mut debited = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), DebitOutcome::Debited { .. }) {
                debited += 1;
            }
        }
        assert_eq!(debited, 3);

        let user = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.credits, dec("1.00"));
        let purchases = db
            .list_credit_transactions(user.id, 50)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.transaction_type == CreditTransactionType::LabelPurchase)
            .count();
        assert_eq!(purchases, 3);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_payment_source_is_credited_once(pool: PgPool) {
        let db = PgDatabase::new(pool.clone());
        let user = create_user(&db, "jane").await;

        assert_eq!(
            db.apply_payment_credit(&payment(user.id, "15.00", "stripe:pi_once")).await.unwrap(),
            CreditOutcome::Applied { balance_after: dec("15.00") }
        );
        assert_eq!(
            db.apply_payment_credit(&payment(user.id, "15.00", "stripe:pi_once")).await.unwrap(),
            CreditOutcome::AlreadyProcessed
        );

        // The rejected duplicate rolled back its balance update
        let user = db.get_user_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.credits, dec("15.00"));
        assert_eq!(db.list_credit_transactions(user.id, 10).await.unwrap().len(), 1);

        let constraint: String = sqlx::query_scalar(
            "SELECT conname::text FROM pg_constraint WHERE conrelid = 'credit_transactions'::regclass AND contype = 'u'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(constraint, SOURCE_ID_CONSTRAINT);

        let err = db
            .apply_payment_credit(&payment(uuid::Uuid::new_v4(), "5.00", "stripe:pi_ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_passcode_replacement_and_attempts(pool: PgPool) {
        let db = PgDatabase::new(pool);

        db.replace_otp("jane@example.com", "1111").await.unwrap();
        assert_eq!(db.record_otp_failure("jane@example.com").await.unwrap(), Some(1));
        assert_eq!(db.record_otp_failure("jane@example.com").await.unwrap(), Some(2));

        let replaced = db.replace_otp("jane@example.com", "2222").await.unwrap();
        assert_eq!(replaced.code, "2222");
        assert_eq!(replaced.attempts, 0);
        let stored = db.get_otp("jane@example.com").await.unwrap().unwrap();
        assert_eq!(stored.code, "2222");

        assert_eq!(db.record_otp_failure("nobody@example.com").await.unwrap(), None);
        assert!(db.delete_otp("jane@example.com").await.unwrap());
        assert!(!db.delete_otp("jane@example.com").await.unwrap());

        db.replace_otp("old@example.com", "3333").await.unwrap();
        assert_eq!(db.delete_expired_otps(Utc::now() - TimeDelta::minutes(5)).await.unwrap(), 0);
        assert_eq!(db.delete_expired_otps(Utc::now() + TimeDelta::minutes(1)).await.unwrap(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_verification_token_replacement(pool: PgPool) {
        let db = PgDatabase::new(pool);
        let user = create_user(&db, "jane").await;

        db.replace_verification_token(user.id, "first").await.unwrap();
        db.replace_verification_token(user.id, "second").await.unwrap();
        assert_eq!(db.get_verification_token(user.id).await.unwrap().unwrap().token_hash, "second");

        let err = db
            .replace_verification_token(uuid::Uuid::new_v4(), "orphan")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }), "{err:?}");

        assert!(db.delete_verification_token(user.id).await.unwrap());
        assert!(db.get_verification_token(user.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_unverified_users_before(pool: PgPool) {
        let db = PgDatabase::new(pool);
        let stale = create_user(&db, "stale").await;
        let verified = create_user(&db, "verified").await;
        db.mark_user_verified(verified.id).await.unwrap();
        db.replace_verification_token(stale.id, "hash").await.unwrap();

        assert_eq!(db.delete_unverified_users_before(Utc::now() - TimeDelta::hours(1)).await.unwrap(), 0);
        assert_eq!(db.delete_unverified_users_before(Utc::now() + TimeDelta::minutes(1)).await.unwrap(), 1);

        assert!(db.get_user_by_id(stale.id).await.unwrap().is_none());
        assert!(db.get_verification_token(stale.id).await.unwrap().is_none());
        assert!(db.get_user_by_id(verified.id).await.unwrap().is_some());
    }
}
