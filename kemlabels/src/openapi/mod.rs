//! OpenAPI document for the HTTP API, served at `/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{api, errors, labels, orders, payment_providers};

/// Session cookie security scheme.
struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "session_token".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "kemlabels_session",
                    "Session cookie set by `/auth/signin` and `/auth/signup`",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "kemlabels", description = "Shipping label ordering and credit management API"),
    modifiers(&SessionCookieAddon),
    paths(
        api::handlers::auth::signin,
        api::handlers::auth::signup,
        api::handlers::auth::logout,
        api::handlers::users::email_exists,
        api::handlers::users::forgot_password,
        api::handlers::users::validate_otp,
        api::handlers::users::update_password,
        api::handlers::users::update_username,
        api::handlers::users::update_email_request,
        api::handlers::users::update_email,
        api::handlers::users::update_password_request,
        api::handlers::users::resend_otp_email,
        api::handlers::users::verify_email,
        api::handlers::users::confirm_verification,
        api::handlers::users::check_verification,
        api::handlers::orders::create_single_order,
        api::handlers::orders::create_bulk_order,
        api::handlers::orders::get_sender_info,
        api::handlers::orders::get_pricings,
        api::handlers::payments::create_card_payment,
        api::handlers::payments::card_webhook,
        api::handlers::payments::create_crypto_payment,
        api::handlers::payments::crypto_webhook,
        api::handlers::payments::credit_history,
    ),
    components(schemas(
        errors::ErrorBody,
        api::models::auth::SignupRequest,
        api::models::auth::SigninRequest,
        api::models::auth::AuthResponse,
        api::models::auth::AuthSuccessResponse,
        api::models::users::CurrentUser,
        api::models::users::UserResponse,
        api::models::users::EmailRequest,
        api::models::users::EmailExistsResponse,
        api::models::users::ValidateOtpRequest,
        api::models::users::ResetGrantResponse,
        api::models::users::UpdatePasswordRequest,
        api::models::users::UpdateUsernameRequest,
        api::models::users::UpdateEmailRequest,
        api::models::users::ConfirmEmailUpdateRequest,
        api::models::users::VerificationStatusResponse,
        api::models::users::MessageResponse,
        api::models::orders::SenderInfoResponse,
        api::models::orders::PricingResponse,
        api::models::payments::CreatePaymentRequest,
        api::models::payments::WebhookAck,
        api::models::payments::CreditTransactionResponse,
        orders::SingleOrder,
        orders::OrderReceipt,
        labels::Courier,
        labels::Package,
        payment_providers::PaymentCreated,
    )),
    tags(
        (name = "authentication", description = "Sign in, sign up and sign out"),
        (name = "users", description = "Email verification, passcodes and profile changes"),
        (name = "orders", description = "Shipping label orders"),
        (name = "payments", description = "Credit purchases and history"),
    )
)]
pub struct ApiDoc;
