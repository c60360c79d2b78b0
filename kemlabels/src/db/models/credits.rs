//! Database models for credit transactions.

use crate::types::{CreditTransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Credit transaction type enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    /// Credits bought with a card
    CardPayment,
    /// Credits bought with crypto, bonus included
    CryptoPayment,
    /// Credits spent on labels
    LabelPurchase,
}

/// Request to take credits from a user for an order
#[derive(Debug, Clone)]
pub struct CreditDebitRequest {
    pub user_id: UserId,
    pub amount: Decimal,
    pub description: String,
}

/// Outcome of a conditional debit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance_after: Decimal },
    /// Nothing was changed; the balance did not cover the amount
    Insufficient { available: Decimal },
}

/// Credits granted by a verified payment event
#[derive(Debug, Clone)]
pub struct PaymentCreditRequest {
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: Decimal,
    /// Provider reference; a given source is credited at most once
    pub source_id: String,
    pub description: Option<String>,
}

/// Outcome of applying a payment credit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied { balance_after: Decimal },
    AlreadyProcessed,
}

/// Database response for a credit transaction
#[derive(Debug, Clone, PartialEq)]
pub struct CreditTransactionDBResponse {
    pub id: CreditTransactionId,
    pub user_id: UserId,
    pub transaction_type: CreditTransactionType,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub source_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}
