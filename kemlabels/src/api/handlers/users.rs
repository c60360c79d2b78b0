//! Account maintenance: email verification, passcodes, password and profile changes.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    api::{
        handlers::auth::session_response,
        models::{
            auth::{AuthResponse, WithSessionCookie},
            users::{
                ConfirmEmailUpdateRequest, CurrentUser, EmailExistsResponse, EmailRequest, MessageResponse,
                ResetGrantResponse, UpdateEmailRequest, UpdatePasswordRequest, UpdateUsernameRequest,
                VerificationStatusResponse, ValidateOtpRequest,
            },
        },
    },
    auth::{
        current_user::load_user,
        password::{self, Argon2Params},
        session, tokens,
    },
    db::models::users::UserDBResponse,
    email::OutgoingEmail,
    errors::{Error, Result},
    types::{UserId, abbrev_uuid, mask_email},
};

/// Trim and lowercase an email address, rejecting ones without a local part and domain
pub(crate) fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(Error::MissingData {
            field: "email".to_string(),
        });
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => Ok(email),
        _ => Err(Error::Validation {
            message: "Invalid email address".to_string(),
        }),
    }
}

/// Issue a fresh verification token for `user` and mail the link
#[instrument(skip_all, fields(user_id = %abbrev_uuid(&user.id)), err)]
pub(crate) async fn send_verification(state: &AppState, user: &UserDBResponse) -> Result<()> {
    let token = tokens::generate_verification_token();
    state
        .db
        .replace_verification_token(user.id, &tokens::hash_token(&token))
        .await?;

    let link = format!(
        "{}/user/{}/verify/{}",
        state.config.dashboard_url.trim_end_matches('/'),
        user.id,
        token
    );
    state
        .notifier
        .send(OutgoingEmail::verification(
            &user.email,
            &user.username,
            &link,
            state.config.tokens.verification_ttl,
        ))
        .await
}

/// Replace any passcode for `email` with a new one and mail it
#[instrument(skip_all, fields(email = %mask_email(email)), err)]
async fn issue_otp(state: &AppState, email: &str) -> Result<()> {
    let code = tokens::generate_otp();
    state.db.replace_otp(email, &code).await?;
    state
        .notifier
        .send(OutgoingEmail::otp(email, &code, state.config.tokens.otp_ttl))
        .await
}

/// Check a passcode and delete it on success. Expired passcodes are deleted too, as
/// are passcodes that have run out of attempts.
async fn consume_otp(state: &AppState, email: &str, code: &str) -> Result<()> {
    let invalid = |message: &str| Error::InvalidToken {
        message: message.to_string(),
    };
    let otp = state
        .db
        .get_otp(email)
        .await?
        .ok_or_else(|| invalid("Invalid passcode"))?;

    if otp.is_expired(state.config.tokens.otp_ttl, Utc::now()) {
        state.db.delete_otp(email).await?;
        return Err(invalid("Passcode has expired, please request a new one"));
    }
    if otp.code != code.trim() {
        let attempts = state.db.record_otp_failure(email).await?.unwrap_or(i32::MAX);
        if i64::from(attempts) >= i64::from(state.config.tokens.otp_max_attempts) {
            warn!(email = %mask_email(email), attempts, "Passcode discarded after repeated failures");
            state.db.delete_otp(email).await?;
            return Err(invalid("Too many incorrect attempts, please request a new passcode"));
        }
        return Err(invalid("Invalid passcode"));
    }
    state.db.delete_otp(email).await?;
    Ok(())
}

async fn user_by_email(state: &AppState, email: &str) -> Result<UserDBResponse> {
    state
        .db
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: mask_email(email),
        })
}

/// Check whether an account uses an email address
#[utoipa::path(
    post,
    path = "/user/emailExists",
    request_body = EmailRequest,
    tag = "users",
    responses((status = 200, body = EmailExistsResponse))
)]
#[tracing::instrument(skip_all)]
pub async fn email_exists(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<EmailExistsResponse>> {
    let email = normalize_email(&request.email)?;
    let exists = state.db.get_user_by_email(&email).await?.is_some();
    Ok(Json(EmailExistsResponse { exists }))
}

/// Mail a passcode for resetting a forgotten password
#[utoipa::path(
    post,
    path = "/user/forgotPassword",
    request_body = EmailRequest,
    tag = "users",
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, description = "No account with this email", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn forgot_password(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>> {
    let email = normalize_email(&request.email)?;
    let user = user_by_email(&state, &email).await?;
    issue_otp(&state, &user.email).await?;
    Ok(Json(MessageResponse::new("A passcode has been sent to your email")))
}

/// Exchange a valid passcode for a password reset grant
#[utoipa::path(
    post,
    path = "/user/validateOtp",
    request_body = ValidateOtpRequest,
    tag = "users",
    responses(
        (status = 200, body = ResetGrantResponse),
        (status = 400, description = "Invalid or expired passcode", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn validate_otp(State(state): State<AppState>, Json(request): Json<ValidateOtpRequest>) -> Result<Json<ResetGrantResponse>> {
    let email = normalize_email(&request.email)?;
    let user = user_by_email(&state, &email).await?;
    consume_otp(&state, &email, &request.otp).await?;

    let reset_token = session::create_reset_grant(user.id, &user.email, &state.config)?;
    Ok(Json(ResetGrantResponse { reset_token }))
}

/// Set a new password, authorized by a reset grant or by the session cookie
#[utoipa::path(
    post,
    path = "/user/updatePassword",
    request_body = UpdatePasswordRequest,
    tag = "users",
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "Invalid grant, password policy or unchanged password", body = crate::errors::ErrorBody),
        (status = 401, description = "Neither a grant nor a session", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_password(
    State(state): State<AppState>,
    current_user: Option<CurrentUser>,
    Json(request): Json<UpdatePasswordRequest>,
) -> Result<Json<MessageResponse>> {
    let user_id: UserId = match (&request.reset_token, &current_user) {
        (Some(grant), _) => {
            let claims = session::verify_reset_grant(grant, &state.config)?;
            claims.sub
        }
        (None, Some(current)) => current.id,
        (None, None) => return Err(Error::Unauthenticated { message: None }),
    };
    let user = state.db.get_user_by_id(user_id).await?.ok_or_else(|| Error::InvalidToken {
        message: "Invalid or expired reset token".to_string(),
    })?;

    password::check_policy(&request.password, &state.config.auth.password)?;
    if password::verify_password_blocking(request.password.clone(), user.password_hash.clone()).await? {
        return Err(Error::Validation {
            message: "New password must be different from the current password".to_string(),
        });
    }

    let hash = password::hash_password_blocking(request.password, Argon2Params::from(&state.config.auth.password)).await?;
    state.db.update_password(user.id, &hash).await?;
    info!(user_id = %abbrev_uuid(&user.id), "Password updated");
    Ok(Json(MessageResponse::new("Password updated")))
}

/// Change the signed-in user's username
#[utoipa::path(
    post,
    path = "/user/updateUsername",
    request_body = UpdateUsernameRequest,
    tag = "users",
    responses(
        (status = 200, description = "Username changed, session cookie reissued", body = AuthResponse),
        (status = 400, description = "Username taken", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_username(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UpdateUsernameRequest>,
) -> Result<WithSessionCookie<AuthResponse>> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(Error::MissingData {
            field: "username".to_string(),
        });
    }
    let user = state.db.update_username(current_user.id, username).await?;
    session_response(StatusCode::OK, user, "Username updated", &state.config)
}

/// Mail a passcode to a new address the signed-in user wants to switch to
#[utoipa::path(
    post,
    path = "/user/updateEmailRequest",
    request_body = UpdateEmailRequest,
    tag = "users",
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "Address already in use", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_email_request(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UpdateEmailRequest>,
) -> Result<Json<MessageResponse>> {
    let new_email = normalize_email(&request.new_email)?;
    if new_email == current_user.email {
        return Err(Error::Validation {
            message: "New email must be different from the current email".to_string(),
        });
    }
    if state.db.get_user_by_email(&new_email).await?.is_some() {
        return Err(Error::Duplicate {
            message: "An account with this email address already exists".to_string(),
        });
    }
    issue_otp(&state, &new_email).await?;
    Ok(Json(MessageResponse::new("A passcode has been sent to your new email")))
}

/// Switch to the new address once its passcode is confirmed
#[utoipa::path(
    post,
    path = "/user/updateEmail",
    request_body = ConfirmEmailUpdateRequest,
    tag = "users",
    responses(
        (status = 200, description = "Email changed, session cookie reissued", body = AuthResponse),
        (status = 400, description = "Invalid passcode or address in use", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_email(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ConfirmEmailUpdateRequest>,
) -> Result<WithSessionCookie<AuthResponse>> {
    let new_email = normalize_email(&request.new_email)?;
    consume_otp(&state, &new_email, &request.otp).await?;
    let user = state.db.update_email(current_user.id, &new_email).await?;
    info!(user_id = %abbrev_uuid(&user.id), "Email updated");
    session_response(StatusCode::OK, user, "Email updated", &state.config)
}

/// Mail a passcode to the signed-in user before a password change
#[utoipa::path(
    post,
    path = "/user/updatePasswordRequest",
    tag = "users",
    responses((status = 200, body = MessageResponse)),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn update_password_request(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MessageResponse>> {
    let user = load_user(&state, &current_user).await?;
    issue_otp(&state, &user.email).await?;
    Ok(Json(MessageResponse::new("A passcode has been sent to your email")))
}

/// Mail a new passcode to an address with a pending one
#[utoipa::path(
    post,
    path = "/user/resendOtpEmail",
    request_body = EmailRequest,
    tag = "users",
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "No passcode was requested for this address", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resend_otp_email(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>> {
    let email = normalize_email(&request.email)?;
    if state.db.get_otp(&email).await?.is_none() {
        return Err(Error::InvalidToken {
            message: "No passcode was requested for this address".to_string(),
        });
    }
    issue_otp(&state, &email).await?;
    Ok(Json(MessageResponse::new("A new passcode has been sent")))
}

/// Send the signed-in user a fresh verification link
#[utoipa::path(
    get,
    path = "/user/verifyEmail",
    tag = "users",
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "Already verified", body = crate::errors::ErrorBody),
    ),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MessageResponse>> {
    let user = load_user(&state, &current_user).await?;
    if user.verified {
        return Err(Error::Validation {
            message: "Email address is already verified".to_string(),
        });
    }
    send_verification(&state, &user).await?;
    Ok(Json(MessageResponse::new("A verification link has been sent to your email")))
}

/// Confirm an email address with the token from the verification link
#[utoipa::path(
    get,
    path = "/user/{id}/verify/{token}",
    tag = "users",
    params(
        ("id" = String, Path, description = "User ID"),
        ("token" = String, Path, description = "Token from the verification email"),
    ),
    responses(
        (status = 200, body = MessageResponse),
        (status = 400, description = "Invalid or expired link", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&id)))]
pub async fn confirm_verification(
    State(state): State<AppState>,
    Path((id, token)): Path<(UserId, String)>,
) -> Result<Json<MessageResponse>> {
    let invalid = || Error::InvalidToken {
        message: "Invalid or expired verification link".to_string(),
    };
    let stored = state.db.get_verification_token(id).await?.ok_or_else(invalid)?;

    if stored.is_expired(state.config.tokens.verification_ttl, Utc::now()) {
        state.db.delete_verification_token(id).await?;
        return Err(Error::InvalidToken {
            message: "Verification link has expired, please request a new one".to_string(),
        });
    }
    if stored.token_hash != tokens::hash_token(&token) {
        return Err(invalid());
    }

    state.db.mark_user_verified(id).await?;
    state.db.delete_verification_token(id).await?;
    info!("Email verified");
    Ok(Json(MessageResponse::new("Email verified")))
}

/// Whether the signed-in user's email is verified
#[utoipa::path(
    get,
    path = "/user/checkVerification",
    tag = "users",
    responses((status = 200, body = VerificationStatusResponse)),
    security(("session_token" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn check_verification(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<VerificationStatusResponse>> {
    let user = load_user(&state, &current_user).await?;
    Ok(Json(VerificationStatusResponse { verified: user.verified }))
}
