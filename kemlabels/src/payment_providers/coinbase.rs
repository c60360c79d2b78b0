//! Coinbase Commerce payment provider implementation
//!
//! Crypto payments are fixed-price charges paid on Coinbase's hosted checkout page.
//! Confirmed charges are credited with a bonus on top of the charged amount.

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{PaymentCreated, PaymentCredit, PaymentError, PaymentProvider, Result, signing, validate_amount};
use crate::{config::CoinbaseConfig, db::models::credits::CreditTransactionType, types::mask_email};

pub const SIGNATURE_HEADER: &str = "x-cc-webhook-signature";
const API_VERSION: &str = "2018-03-22";
/// Event types that mean the charge has been paid in full
const CREDITED_EVENTS: [&str; 2] = ["charge:confirmed", "charge:resolved"];

pub struct CoinbaseProvider {
    http: Client,
    config: CoinbaseConfig,
    redirect_url: String,
    cancel_url: String,
}

impl CoinbaseProvider {
    pub fn new(config: CoinbaseConfig, dashboard_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::ProviderApi(format!("failed to build HTTP client: {e}")))?;
        let base = dashboard_url.trim_end_matches('/');
        Ok(Self {
            redirect_url: format!("{base}{}", config.redirect_path),
            cancel_url: format!("{base}{}", config.cancel_path),
            http,
            config,
        })
    }

    /// Credits granted for a charge of `amount`, bonus included
    pub fn credited_amount(&self, amount: Decimal) -> Decimal {
        (amount * (Decimal::ONE + self.config.bonus_rate)).round_dp(2)
    }
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    name: &'static str,
    description: String,
    pricing_type: &'static str,
    local_price: LocalPrice,
    metadata: ChargeMetadata<'a>,
    redirect_url: &'a str,
    cancel_url: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalPrice {
    amount: String,
    currency: String,
}

#[derive(Debug, Serialize)]
struct ChargeMetadata<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChargeEnvelope {
    data: ChargeCreated,
}

#[derive(Debug, Deserialize)]
struct ChargeCreated {
    id: String,
    hosted_url: String,
}

#[derive(Debug, Deserialize)]
struct WebhookDelivery {
    event: Event,
}

#[derive(Debug, Deserialize)]
struct Event {
    #[serde(rename = "type")]
    event_type: String,
    data: ChargeObject,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    metadata: Option<WebhookMetadata>,
    #[serde(default)]
    pricing: Option<ChargePricing>,
}

#[derive(Debug, Deserialize)]
struct WebhookMetadata {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargePricing {
    local: LocalPrice,
}

#[async_trait]
impl PaymentProvider for CoinbaseProvider {
    fn rail(&self) -> &'static str {
        "Crypto"
    }

    #[instrument(skip(self, email), fields(email = %mask_email(email)), err)]
    async fn create_payment(&self, email: &str, amount: Decimal) -> Result<PaymentCreated> {
        let amount = validate_amount(amount)?;
        let url = self
            .config
            .base_url
            .join("charges")
            .map_err(|e| PaymentError::ProviderApi(e.to_string()))?;

        let request = ChargeRequest {
            name: "KEMLabels credits",
            description: format!("${} in label credits", amount.round_dp(2)),
            pricing_type: "fixed_price",
            local_price: LocalPrice {
                amount: amount.round_dp(2).to_string(),
                currency: "USD".to_string(),
            },
            metadata: ChargeMetadata { email },
            redirect_url: &self.redirect_url,
            cancel_url: &self.cancel_url,
        };

        let response = self
            .http
            .post(url)
            .header("X-CC-Api-Key", &self.config.api_key)
            .header("X-CC-Version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| PaymentError::ProviderApi(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PaymentError::ProviderApi(format!("charge creation returned HTTP {status}")));
        }
        let envelope: ChargeEnvelope = response
            .json()
            .await
            .map_err(|e| PaymentError::ProviderApi(format!("invalid response: {e}")))?;
        debug!(charge_id = %envelope.data.id, "Created Coinbase charge");

        Ok(PaymentCreated {
            payment_id: envelope.data.id,
            client_secret: None,
            hosted_url: Some(envelope.data.hosted_url),
        })
    }

    #[instrument(skip_all, err)]
    async fn validate_webhook(&self, headers: &HeaderMap, body: &str) -> Result<Option<PaymentCredit>> {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| PaymentError::InvalidSignature("missing X-CC-Webhook-Signature header".to_string()))?;
        if !signing::verify_hex_signature(&self.config.webhook_secret, body.as_bytes(), signature) {
            return Err(PaymentError::InvalidSignature("signature mismatch".to_string()));
        }

        let delivery: WebhookDelivery =
            serde_json::from_str(body).map_err(|e| PaymentError::InvalidData(e.to_string()))?;
        let event = delivery.event;
        if !CREDITED_EVENTS.contains(&event.event_type.as_str()) {
            debug!(event_type = %event.event_type, "Ignoring Coinbase event");
            return Ok(None);
        }

        let charge = event.data;
        let email = charge
            .metadata
            .and_then(|m| m.email)
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| PaymentError::InvalidData("charge has no email metadata".to_string()))?;
        let amount: Decimal = charge
            .pricing
            .ok_or_else(|| PaymentError::InvalidData("charge has no pricing".to_string()))?
            .local
            .amount
            .parse()
            .map_err(|e| PaymentError::InvalidData(format!("invalid charge amount: {e}")))?;
        let amount = validate_amount(amount.normalize())?;

        Ok(Some(PaymentCredit {
            email: email.trim().to_lowercase(),
            amount: self.credited_amount(amount),
            source_id: format!("coinbase:{}", charge.id),
            transaction_type: CreditTransactionType::CryptoPayment,
            description: format!("Crypto payment of ${amount}"),
        }))
    }
}
