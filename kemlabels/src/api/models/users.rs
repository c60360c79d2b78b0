//! API request/response models for users.

use crate::db::models::users::{ContactDetails, UserDBResponse};
use crate::types::UserId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The user behind a valid session cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub username: String,
}

impl From<&UserDBResponse> for CurrentUser {
    fn from(user: &UserDBResponse) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

// User response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[schema(value_type = String)]
    pub credits: Decimal,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_info: Option<ContactDetails>,
    pub created_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            username: db.username,
            email: db.email,
            credits: db.credits,
            verified: db.verified,
            sender_info: db.sender_info,
            created_at: db.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailExistsResponse {
    pub exists: bool,
}

/// Passcode check for the forgot-password and password-change flows
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidateOtpRequest {
    pub email: String,
    pub otp: String,
}

/// Short-lived grant that authorizes one password update
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResetGrantResponse {
    pub reset_token: String,
}

/// New password, authorized either by a reset grant or by the session cookie
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePasswordRequest {
    #[serde(default)]
    pub reset_token: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateUsernameRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateEmailRequest {
    pub new_email: String,
}

/// Confirms an email change with the passcode sent to the new address
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmEmailUpdateRequest {
    pub new_email: String,
    pub otp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerificationStatusResponse {
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
