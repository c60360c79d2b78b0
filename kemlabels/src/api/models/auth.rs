use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::models::users::UserResponse;

/// Request to create an account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignupRequest {
    /// Username (must be unique)
    pub username: String,
    /// Email address (must be unique)
    pub email: String,
    /// Password (will be hashed)
    pub password: String,
}

/// Request to sign in
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

/// Response after successful sign-in or sign-up
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub message: String,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthSuccessResponse {
    pub message: String,
}

/// A JSON body sent together with a `Set-Cookie` header
pub struct WithSessionCookie<T> {
    pub status: StatusCode,
    pub body: T,
    pub cookie: String,
}

impl<T: Serialize> IntoResponse for WithSessionCookie<T> {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&self.cookie) {
            Ok(value) => {
                headers.insert(header::SET_COOKIE, value);
            }
            Err(e) => {
                tracing::error!("Session cookie is not a valid header value: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
        (self.status, headers, Json(self.body)).into_response()
    }
}
