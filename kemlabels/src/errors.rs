use crate::db::errors::DbError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Signed in, but the email address has not been verified yet
    #[error("Email address not verified")]
    EmailNotVerified,

    /// A required request field is absent or blank
    #[error("Missing required field: {field}")]
    MissingData { field: String },

    /// Malformed input or business rule violation
    #[error("{message}")]
    Validation { message: String },

    #[error("Invalid courier: {courier}")]
    InvalidCourier { courier: String },

    /// Balance does not cover the order
    #[error("Insufficient credit balance: {required} required, {available} available")]
    InsufficientCredit { required: Decimal, available: Decimal },

    /// Expired, unknown or mismatched passcode or token
    #[error("{message}")]
    InvalidToken { message: String },

    /// Username or email already in use
    #[error("{message}")]
    Duplicate { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Upload larger than the configured limit, in bytes
    #[error("Payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The label API failed or rejected the shipment
    #[error("Label provider failure: {message}")]
    LabelProvider { message: String },

    /// The card or crypto processor failed
    #[error("Payment provider failure: {message}")]
    PaymentProvider { message: String },

    /// The payment rail has no configuration on this deployment
    #[error("Payment rail {rail} is not configured")]
    PaymentNotConfigured { rail: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body returned for every failed request
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable identifier, e.g. `insufficient_credit`
    pub code: &'static str,
    /// Message suitable for direct display
    pub message: String,
}

impl Error {
    /// Stable identifier clients match on instead of the message text
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated { .. } => "unauthenticated",
            Error::EmailNotVerified => "email_not_verified",
            Error::MissingData { .. } => "missing_data",
            Error::Validation { .. } => "validation_failed",
            Error::InvalidCourier { .. } => "invalid_courier",
            Error::InsufficientCredit { .. } => "insufficient_credit",
            Error::InvalidToken { .. } => "invalid_token",
            Error::Duplicate { .. } => "duplicate",
            Error::NotFound { .. } => "not_found",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::LabelProvider { .. } => "label_provider_failure",
            Error::PaymentProvider { .. } => "payment_provider_failure",
            Error::PaymentNotConfigured { .. } => "payment_not_configured",
            Error::Internal { .. } | Error::Other(_) => "internal_error",
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "not_found",
                DbError::UniqueViolation { .. } => "duplicate",
                DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. } => "validation_failed",
                DbError::Other(_) => "internal_error",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::EmailNotVerified => StatusCode::FORBIDDEN,
            Error::MissingData { .. }
            | Error::Validation { .. }
            | Error::InvalidCourier { .. }
            | Error::InsufficientCredit { .. }
            | Error::InvalidToken { .. }
            | Error::Duplicate { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::LabelProvider { .. } | Error::PaymentProvider { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PaymentNotConfigured { .. } => StatusCode::NOT_IMPLEMENTED,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::EmailNotVerified => "Please verify your email address first".to_string(),
            Error::MissingData { field } => format!("Missing required field: {field}"),
            Error::Validation { message } | Error::InvalidToken { message } | Error::Duplicate { message } => {
                message.clone()
            }
            Error::InvalidCourier { courier } => format!("Invalid courier: {courier}"),
            Error::InsufficientCredit { .. } => "Insufficient credit balance".to_string(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::PayloadTooLarge { limit } => format!("File is too large (limit {limit} bytes)"),
            Error::LabelProvider { .. } => "The label provider could not create the label".to_string(),
            Error::PaymentProvider { .. } => "The payment provider request failed".to_string(),
            Error::PaymentNotConfigured { rail } => format!("{rail} payments are not available"),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, table, .. } => match (table.as_deref(), constraint.as_deref()) {
                    (Some("users"), Some(c)) if c.contains("email") => "An account with this email address already exists".to_string(),
                    (Some("users"), Some(c)) if c.contains("username") => "This username is already taken".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    /// Body sent to the client
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.user_message(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_))
            | Error::Internal { .. }
            | Error::Other(_)
            | Error::LabelProvider { .. }
            | Error::PaymentProvider { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) | Error::Duplicate { .. } => {
                tracing::warn!("Constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::EmailNotVerified => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::PaymentNotConfigured { .. } => {
                tracing::warn!("Payment rail unavailable: {}", self);
            }
            Error::MissingData { .. }
            | Error::Validation { .. }
            | Error::InvalidCourier { .. }
            | Error::InsufficientCredit { .. }
            | Error::InvalidToken { .. }
            | Error::NotFound { .. }
            | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_duplicate_email_maps_to_bad_request() {
        let err = Error::from(DbError::user_conflict("email"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "duplicate");
        assert_eq!(err.user_message(), "An account with this email address already exists");
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let err = Error::Other(anyhow::anyhow!("connection refused to 10.0.0.3"));
        assert_eq!(err.user_message(), "Internal server error");
        let err = Error::LabelProvider {
            message: "upstream said: bad api key".to_string(),
        };
        assert!(!err.user_message().contains("api key"));
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = Error::InsufficientCredit {
            required: Decimal::new(1000, 2),
            available: Decimal::new(500, 2),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "insufficient_credit");
        assert_eq!(body["message"], "Insufficient credit balance");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::EmailNotVerified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::PayloadTooLarge { limit: 1 }.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            Error::PaymentNotConfigured { rail: "Card".to_string() }.status_code(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(Error::Database(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
    }
}
