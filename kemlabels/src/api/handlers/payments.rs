//! Credit purchases on the card and crypto rails, and the signed-in user's ledger.
//!
//! Webhooks answer 400 only for deliveries whose signature does not verify, so the
//! provider retries those. Authentic deliveries are acknowledged even when they
//! cannot be credited; the failure is logged for manual follow-up.

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    AppState,
    api::models::{
        payments::{CreatePaymentRequest, CreditHistoryQuery, CreditTransactionResponse, WebhookAck},
        users::CurrentUser,
    },
    auth::current_user::VerifiedUser,
    errors::{Error, Result},
    payment_providers::{self, PaymentCreated, PaymentError, PaymentProvider},
    types::abbrev_uuid,
};

const CARD: &str = "Card";
const CRYPTO: &str = "Crypto";

fn configured<'a>(provider: &'a Option<Arc<dyn PaymentProvider>>, rail: &str) -> Result<&'a Arc<dyn PaymentProvider>> {
    provider.as_ref().ok_or_else(|| Error::PaymentNotConfigured { rail: rail.to_string() })
}

async fn create_payment(
    provider: &dyn PaymentProvider,
    user: &crate::db::models::users::UserDBResponse,
    request: CreatePaymentRequest,
) -> Result<Json<PaymentCreated>> {
    let amount = payment_providers::validate_amount(request.amount)?;
    let created = provider.create_payment(&user.email, amount).await?;
    info!(
        rail = provider.rail(),
        user_id = %abbrev_uuid(&user.id),
        payment_id = %created.payment_id,
        %amount,
        "Payment created"
    );
    Ok(Json(created))
}

async fn handle_webhook(state: &AppState, provider: &dyn PaymentProvider, headers: &HeaderMap, body: &str) -> Result<Json<WebhookAck>> {
    let ack = Json(WebhookAck { received: true });
    let credit = match provider.validate_webhook(headers, body).await {
        Ok(Some(credit)) => credit,
        Ok(None) => return Ok(ack),
        Err(PaymentError::InvalidSignature(reason)) => {
            warn!(rail = provider.rail(), %reason, "Rejected webhook delivery");
            return Err(Error::Validation {
                message: "Invalid webhook signature".to_string(),
            });
        }
        Err(e) => {
            error!(rail = provider.rail(), "Unusable webhook delivery: {}", e);
            return Ok(ack);
        }
    };

    if let Err(e) = payment_providers::process_credit(state.db.as_ref(), &credit).await {
        error!(rail = provider.rail(), source_id = %credit.source_id, "Failed to credit payment: {}", e);
    }
    Ok(ack)
}

/// Start a card payment for `amount` dollars of credit
#[utoipa::path(
    post,
    path = "/payment/stripe/create",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Payment intent created", body = PaymentCreated),
        (status = 400, description = "Invalid amount", body = crate::errors::ErrorBody),
        (status = 403, description = "Email not verified", body = crate::errors::ErrorBody),
        (status = 501, description = "Card payments not configured", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_card_payment(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentCreated>> {
    let provider = configured(&state.card, CARD)?;
    create_payment(provider.as_ref(), &user, request).await
}

/// Stripe event delivery
#[utoipa::path(
    post,
    path = "/payment/webhook",
    tag = "payments",
    request_body(content = String, description = "Raw Stripe event, signed in the `Stripe-Signature` header"),
    responses(
        (status = 200, body = WebhookAck),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorBody),
        (status = 501, description = "Card payments not configured", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn card_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>> {
    let provider = configured(&state.card, CARD)?;
    handle_webhook(&state, provider.as_ref(), &headers, &body).await
}

/// Start a crypto charge for `amount` dollars, credited with a bonus once confirmed
#[utoipa::path(
    post,
    path = "/payment/crypto/create",
    tag = "payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 200, description = "Charge created", body = PaymentCreated),
        (status = 400, description = "Invalid amount", body = crate::errors::ErrorBody),
        (status = 403, description = "Email not verified", body = crate::errors::ErrorBody),
        (status = 501, description = "Crypto payments not configured", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn create_crypto_payment(
    State(state): State<AppState>,
    VerifiedUser(user): VerifiedUser,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentCreated>> {
    let provider = configured(&state.crypto, CRYPTO)?;
    create_payment(provider.as_ref(), &user, request).await
}

/// Coinbase Commerce event delivery
#[utoipa::path(
    post,
    path = "/payment/crypto/webhook",
    tag = "payments",
    request_body(content = String, description = "Raw Coinbase event, signed in the `X-CC-Webhook-Signature` header"),
    responses(
        (status = 200, body = WebhookAck),
        (status = 400, description = "Invalid signature", body = crate::errors::ErrorBody),
        (status = 501, description = "Crypto payments not configured", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn crypto_webhook(State(state): State<AppState>, headers: HeaderMap, body: String) -> Result<Json<WebhookAck>> {
    let provider = configured(&state.crypto, CRYPTO)?;
    handle_webhook(&state, provider.as_ref(), &headers, &body).await
}

/// Most recent credit transactions, newest first
#[utoipa::path(
    get,
    path = "/payment/creditHistory",
    tag = "payments",
    params(CreditHistoryQuery),
    responses((status = 200, body = [CreditTransactionResponse])),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn credit_history(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<CreditHistoryQuery>,
) -> Result<Json<Vec<CreditTransactionResponse>>> {
    let transactions = state.db.list_credit_transactions(current_user.id, query.limit()).await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}
