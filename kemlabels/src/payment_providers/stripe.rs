//! Stripe payment provider implementation
//!
//! Card payments use PaymentIntents. The browser confirms the intent with the
//! returned client secret, and Stripe then posts `payment_intent.succeeded` to the
//! webhook, which is where credits are granted.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::Utc;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use std::collections::HashMap;
use stripe::{Client, ClientBuilder};
use stripe_core::payment_intent::{CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods};
use stripe_types::Currency;
use stripe_webhook::{EventObject, Webhook, WebhookError};
use tracing::{debug, instrument, warn};

use super::{PaymentCreated, PaymentCredit, PaymentError, PaymentProvider, Result, validate_amount};
use crate::{config::StripeConfig, db::models::credits::CreditTransactionType, types::mask_email};

pub const SIGNATURE_HEADER: &str = "stripe-signature";
const EMAIL_METADATA_KEY: &str = "email";

pub struct StripeProvider {
    client: Client,
    currency: Currency,
    config: StripeConfig,
}

impl StripeProvider {
    pub fn new(config: StripeConfig) -> Result<Self> {
        let client = ClientBuilder::new(&config.api_key)
            .url(config.base_url.as_str())
            .build()
            .map_err(|e| PaymentError::ProviderApi(format!("failed to build Stripe client: {e}")))?;
        let currency = config
            .currency
            .to_lowercase()
            .parse::<Currency>()
            .map_err(|_| PaymentError::InvalidData(format!("unsupported currency {}", config.currency)))?;
        Ok(Self { client, currency, config })
    }

    /// Reject a `Stripe-Signature` header whose `t=` is missing or too far from `now`
    fn check_timestamp(&self, header: &str, now: i64) -> Result<()> {
        let timestamp = header
            .split(',')
            .find_map(|part| part.trim().strip_prefix("t="))
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;

        if now.abs_diff(timestamp) > self.config.webhook_tolerance.as_secs() {
            return Err(PaymentError::InvalidSignature("timestamp outside tolerance".to_string()));
        }
        Ok(())
    }
}

/// Dollars to the integer minor units Stripe expects
fn to_cents(amount: Decimal) -> Result<i64> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| PaymentError::InvalidData(format!("amount {amount} out of range")))
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn rail(&self) -> &'static str {
        "Card"
    }

    #[instrument(skip(self, email), fields(email = %mask_email(email)), err)]
    async fn create_payment(&self, email: &str, amount: Decimal) -> Result<PaymentCreated> {
        let cents = to_cents(validate_amount(amount)?)?;
        let metadata = HashMap::from([(EMAIL_METADATA_KEY.to_string(), email.to_string())]);

        let request = CreatePaymentIntent::new(cents, self.currency.clone())
            .metadata(metadata)
            .automatic_payment_methods(CreatePaymentIntentAutomaticPaymentMethods::new(true));

        let intent = tokio::time::timeout(self.config.timeout, request.send(&self.client))
            .await
            .map_err(|_| PaymentError::ProviderApi("Stripe request timed out".to_string()))?
            .map_err(|e| {
                tracing::error!("Failed to create Stripe payment intent: {:?}", e);
                PaymentError::ProviderApi(e.to_string())
            })?;

        let client_secret = intent
            .client_secret
            .ok_or_else(|| PaymentError::ProviderApi("payment intent has no client secret".to_string()))?;
        debug!(payment_intent = %intent.id, cents, "Created payment intent");

        Ok(PaymentCreated {
            payment_id: intent.id.to_string(),
            client_secret: Some(client_secret),
            hosted_url: None,
        })
    }

    #[instrument(skip_all, err)]
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<PaymentCredit>> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PaymentError::InvalidSignature("missing Stripe-Signature header".to_string()))?;
        self.check_timestamp(signature, Utc::now().timestamp())?;

        let event = Webhook::construct_event(body, signature, &self.config.webhook_secret).map_err(|e| match e {
            WebhookError::BadParse(message) => PaymentError::InvalidData(message),
            other => PaymentError::InvalidSignature(other.to_string()),
        })?;

        let intent = match event.data.object {
            EventObject::PaymentIntentSucceeded(intent) => intent,
            _ => {
                debug!(event_type = ?event.type_, "Ignoring Stripe event");
                return Ok(None);
            }
        };

        let Some(email) = intent
            .metadata
            .get(EMAIL_METADATA_KEY)
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
        else {
            warn!(payment_intent = %intent.id, "Succeeded intent has no email metadata");
            return Err(PaymentError::InvalidData("payment intent has no email metadata".to_string()));
        };
        let cents = [intent.amount_received, intent.amount]
            .into_iter()
            .find(|c| *c > 0)
            .ok_or_else(|| PaymentError::InvalidData("payment intent has no amount".to_string()))?;

        Ok(Some(PaymentCredit {
            email: email.to_lowercase(),
            amount: Decimal::new(cents, 2),
            source_id: format!("stripe:{}", intent.id),
            transaction_type: CreditTransactionType::CardPayment,
            description: "Card payment".to_string(),
        }))
    }
}
