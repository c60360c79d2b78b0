use axum::{Json, extract::State, http::StatusCode};
use tracing::{info, warn};

use crate::{
    AppState,
    api::{
        handlers::users::{normalize_email, send_verification},
        models::{
            auth::{AuthResponse, AuthSuccessResponse, SigninRequest, SignupRequest, WithSessionCookie},
            users::{CurrentUser, UserResponse},
        },
    },
    auth::{
        password::{self, Argon2Params},
        session,
    },
    config::Config,
    db::models::users::{UserCreateDBRequest, UserDBResponse},
    errors::Error,
    types::mask_email,
};

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/auth/signin",
    request_body = SigninRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Signed in, session cookie set", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn signin(
    State(state): State<AppState>,
    Json(request): Json<SigninRequest>,
) -> Result<WithSessionCookie<AuthResponse>, Error> {
    let invalid = || Error::Unauthenticated {
        message: Some("Invalid email or password".to_string()),
    };
    let email = normalize_email(&request.email).map_err(|_| invalid())?;

    let user = state.db.get_user_by_email(&email).await?.ok_or_else(invalid)?;
    if !password::verify_password_blocking(request.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    info!(email = %mask_email(&user.email), "User signed in");
    session_response(StatusCode::OK, user, "Login successful", &state.config)
}

/// Create an account and send the verification email
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "Account created, session cookie set", body = AuthResponse),
        (status = 400, description = "Invalid input or duplicate username/email", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<WithSessionCookie<AuthResponse>, Error> {
    let username = request.username.trim().to_string();
    if username.is_empty() {
        return Err(Error::MissingData {
            field: "username".to_string(),
        });
    }
    let email = normalize_email(&request.email)?;
    password::check_policy(&request.password, &state.config.auth.password)?;

    let password_hash =
        password::hash_password_blocking(request.password, Argon2Params::from(&state.config.auth.password)).await?;
    let user = state
        .db
        .create_user(&UserCreateDBRequest {
            username,
            email,
            password_hash,
        })
        .await?;
    info!(email = %mask_email(&user.email), "User signed up");

    // The account exists either way; the user can ask for another link
    if let Err(e) = send_verification(&state, &user).await {
        warn!("Failed to send verification email: {:#}", e);
    }

    session_response(StatusCode::CREATED, user, "Registration successful", &state.config)
}

/// Log out (clear the session cookie)
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "authentication",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> WithSessionCookie<AuthSuccessResponse> {
    WithSessionCookie {
        status: StatusCode::OK,
        body: AuthSuccessResponse {
            message: "Logout successful".to_string(),
        },
        cookie: expired_session_cookie(&state.config),
    }
}

/// Sign a session for `user` and attach it to a response
pub(crate) fn session_response(
    status: StatusCode,
    user: UserDBResponse,
    message: &str,
    config: &Config,
) -> Result<WithSessionCookie<AuthResponse>, Error> {
    let token = session::create_session_token(&CurrentUser::from(&user), config)?;
    Ok(WithSessionCookie {
        status,
        body: AuthResponse {
            user: UserResponse::from(user),
            message: message.to_string(),
        },
        cookie: create_session_cookie(&token, config),
    })
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &Config) -> String {
    let session_config = &config.auth.session;
    let max_age = config.auth.security.jwt_expiry.as_secs();
    let secure = if session_config.cookie_secure { "; Secure" } else { "" };

    format!(
        "{}={}; Path=/; HttpOnly{}; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, secure, session_config.cookie_same_site, max_age
    )
}

fn expired_session_cookie(config: &Config) -> String {
    let session_config = &config.auth.session;
    let secure = if session_config.cookie_secure { "; Secure" } else { "" };
    format!(
        "{}=; Path=/; HttpOnly{}; SameSite={}; Max-Age=0",
        session_config.cookie_name, secure, session_config.cookie_same_site
    )
}
