//! Payment provider abstraction layer
//!
//! Two independent rails buy credits: card payments through Stripe payment
//! intents and crypto payments through Coinbase Commerce charges. Each rail has a
//! create step, called by the signed-in user, and a webhook step, called by the
//! provider once the payment settles.
//!
//! Webhook credits carry the provider's payment id as a source id. The ledger
//! stores each source id at most once, so a redelivered webhook does not credit
//! the same payment twice.

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::{
    config::Config,
    db::{
        Database,
        errors::DbError,
        models::credits::{CreditOutcome, CreditTransactionType, PaymentCreditRequest},
    },
    types::mask_email,
};

pub mod coinbase;
pub mod signing;
pub mod stripe;

/// Card and crypto providers for the configured rails
pub fn create_providers(config: &Config) -> Result<(Option<stripe::StripeProvider>, Option<coinbase::CoinbaseProvider>)> {
    let card = config.payment.stripe.clone().map(stripe::StripeProvider::new).transpose()?;
    let crypto = config
        .payment
        .coinbase
        .clone()
        .map(|c| coinbase::CoinbaseProvider::new(c, &config.dashboard_url))
        .transpose()?;
    Ok((card, crypto))
}

/// Result type for payment provider operations
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Errors that can occur during payment processing
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment provider API error: {0}")]
    ProviderApi(String),

    /// Missing, malformed, stale or mismatched webhook signature
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid payment data: {0}")]
    InvalidData(String),

    #[error("No user with email {0}")]
    UnknownUser(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl From<PaymentError> for crate::errors::Error {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ProviderApi(message) => crate::errors::Error::PaymentProvider { message },
            PaymentError::InvalidSignature(message) | PaymentError::InvalidData(message) => {
                crate::errors::Error::Validation { message }
            }
            PaymentError::UnknownUser(email) => crate::errors::Error::NotFound {
                resource: "User".to_string(),
                id: mask_email(&email),
            },
            PaymentError::Database(e) => crate::errors::Error::Database(e),
        }
    }
}

/// What the client needs to complete a payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentCreated {
    /// Provider id of the intent or charge
    pub payment_id: String,
    /// Stripe client secret for confirming the intent in the browser
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Coinbase hosted checkout page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_url: Option<String>,
}

/// Credits due for a verified, settled payment
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCredit {
    pub email: String,
    pub amount: Decimal,
    /// `stripe:<payment_intent_id>` or `coinbase:<charge_id>`
    pub source_id: String,
    pub transaction_type: CreditTransactionType,
    pub description: String,
}

/// Abstract payment provider interface
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short rail name for logs and errors
    fn rail(&self) -> &'static str;

    /// Start a payment of `amount` dollars tagged with the payer's email
    async fn create_payment(&self, email: &str, amount: Decimal) -> Result<PaymentCreated>;

    /// Verify and decode a webhook delivery.
    ///
    /// Returns `Err(InvalidSignature)` when the signature does not check out, `Ok(None)`
    /// for authentic events that carry no credit, and the credit otherwise.
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<PaymentCredit>>;
}

/// Reject amounts that are not positive whole cents
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::InvalidData("amount must be positive".to_string()));
    }
    if amount.normalize().scale() > 2 {
        return Err(PaymentError::InvalidData("amount has more than two decimal places".to_string()));
    }
    Ok(amount)
}

/// Apply a verified payment credit to its user, at most once per source id
#[instrument(skip(db, credit), fields(email = %mask_email(&credit.email), source_id = %credit.source_id, amount = %credit.amount), err)]
pub async fn process_credit(db: &dyn Database, credit: &PaymentCredit) -> Result<CreditOutcome> {
    let user = db
        .get_user_by_email(&credit.email)
        .await?
        .ok_or_else(|| PaymentError::UnknownUser(credit.email.clone()))?;

    let outcome = db
        .apply_payment_credit(&PaymentCreditRequest {
            user_id: user.id,
            transaction_type: credit.transaction_type,
            amount: credit.amount,
            source_id: credit.source_id.clone(),
            description: Some(credit.description.clone()),
        })
        .await?;

    match outcome {
        CreditOutcome::Applied { balance_after } => info!(%balance_after, "Payment credited"),
        CreditOutcome::AlreadyProcessed => info!("Payment already credited, ignoring redelivery"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDatabase, models::users::UserCreateDBRequest};

    fn credit(source: &str) -> PaymentCredit {
        PaymentCredit {
            email: "payer@example.com".to_string(),
            amount: Decimal::new(500, 2),
            source_id: source.to_string(),
            transaction_type: CreditTransactionType::CardPayment,
            description: "Card payment".to_string(),
        }
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(Decimal::new(1050, 2)).is_ok());
        assert!(validate_amount(Decimal::new(10500, 3)).is_ok());
        assert!(validate_amount(Decimal::new(1055, 3)).is_err());
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(Decimal::new(-1, 0)).is_err());
    }

    #[tokio::test]
    async fn test_process_credit_is_idempotent() {
        let db = MemoryDatabase::new();
        let user = db
            .create_user(&UserCreateDBRequest {
                username: "payer".to_string(),
                email: "payer@example.com".to_string(),
                password_hash: "x".to_string(),
            })
            .await
            .unwrap();

        let first = process_credit(&db, &credit("stripe:pi_1")).await.unwrap();
        assert_eq!(
            first,
            CreditOutcome::Applied {
                balance_after: Decimal::new(500, 2)
            }
        );
        let again = process_credit(&db, &credit("stripe:pi_1")).await.unwrap();
        assert_eq!(again, CreditOutcome::AlreadyProcessed);

        let balance = db.get_user_by_id(user.id).await.unwrap().unwrap().credits;
        assert_eq!(balance, Decimal::new(500, 2));
    }

    #[tokio::test]
    async fn test_process_credit_unknown_user() {
        let db = MemoryDatabase::new();
        let err = process_credit(&db, &credit("stripe:pi_2")).await.unwrap_err();
        assert!(matches!(err, PaymentError::UnknownUser(_)));
    }
}
