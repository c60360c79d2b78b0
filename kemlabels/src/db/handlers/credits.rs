//! Database repository for credit balances and the ledger.

use crate::db::{
    errors::{DbError, Result},
    models::credits::{
        CreditDebitRequest, CreditOutcome, CreditTransactionDBResponse, CreditTransactionType, DebitOutcome,
        PaymentCreditRequest,
    },
};
use crate::types::{CreditTransactionId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, FromRow, PgConnection};
use tracing::{info, instrument};
use uuid::Uuid;

/// Unique constraint on the provider reference of payment credits
pub const SOURCE_ID_CONSTRAINT: &str = "credit_transactions_source_id_key";

// Database entity model for credit transaction
#[derive(Debug, Clone, FromRow)]
struct CreditTransaction {
    pub id: CreditTransactionId,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub source_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransaction> for CreditTransactionDBResponse {
    fn from(tx: CreditTransaction) -> Self {
        Self {
            id: tx.id,
            user_id: tx.user_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            balance_after: tx.balance_after,
            source_id: tx.source_id,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Conditionally decrement the balance and record the purchase, in one transaction.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), amount = %request.amount), err)]
    pub async fn debit(&mut self, request: &CreditDebitRequest) -> Result<DebitOutcome> {
        let mut tx = self.db.begin().await?;

        let balance_after: Option<Decimal> = sqlx::query_scalar(
            "UPDATE users SET credits = credits - $2, updated_at = NOW() WHERE id = $1 AND credits >= $2 RETURNING credits",
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_after) = balance_after else {
            let available: Option<Decimal> = sqlx::query_scalar("SELECT credits FROM users WHERE id = $1")
                .bind(request.user_id)
                .fetch_optional(&mut *tx)
                .await?;
            return match available {
                Some(available) => Ok(DebitOutcome::Insufficient { available }),
                None => Err(DbError::NotFound),
            };
        };

        Self::insert_entry(
            &mut tx,
            request.user_id,
            CreditTransactionType::LabelPurchase,
            request.amount,
            balance_after,
            None,
            Some(&request.description),
        )
        .await?;

        tx.commit().await?;
        Ok(DebitOutcome::Debited { balance_after })
    }

    /// Add credits for a payment. A repeated `source_id` leaves the balance unchanged.
    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id), source_id = %request.source_id), err)]
    pub async fn apply_payment(&mut self, request: &PaymentCreditRequest) -> Result<CreditOutcome> {
        let mut tx = self.db.begin().await?;

        let balance_after: Decimal = sqlx::query_scalar(
            "UPDATE users SET credits = credits + $2, updated_at = NOW() WHERE id = $1 RETURNING credits",
        )
        .bind(request.user_id)
        .bind(request.amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        let inserted = Self::insert_entry(
            &mut tx,
            request.user_id,
            request.transaction_type,
            request.amount,
            balance_after,
            Some(&request.source_id),
            request.description.as_deref(),
        )
        .await;

        match inserted {
            Ok(()) => {
                tx.commit().await?;
                Ok(CreditOutcome::Applied { balance_after })
            }
            // Dropping the transaction rolls back the balance update
            Err(e) if e.is_unique_violation_on(SOURCE_ID_CONSTRAINT) => {
                info!("Payment source already credited");
                Ok(CreditOutcome::AlreadyProcessed)
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_entry(
        conn: &mut PgConnection,
        user_id: UserId,
        transaction_type: CreditTransactionType,
        amount: Decimal,
        balance_after: Decimal,
        source_id: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_transactions (id, user_id, transaction_type, amount, balance_after, source_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(transaction_type)
        .bind(amount)
        .bind(balance_after)
        .bind(source_id)
        .bind(description)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId, limit: i64) -> Result<Vec<CreditTransactionDBResponse>> {
        let rows = sqlx::query_as::<_, CreditTransaction>(
            r#"
            SELECT id, user_id, transaction_type, amount, balance_after, source_id, description, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
