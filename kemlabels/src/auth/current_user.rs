use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    db::models::users::UserDBResponse,
    errors::{Error, Result},
};
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use tracing::{debug, instrument, trace};

/// Read the session token from the configured cookie, if present
pub fn session_cookie_value<'a>(parts: &'a Parts, cookie_name: &str) -> Option<&'a str> {
    let cookie_str = parts.headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    cookie_str
        .split(';')
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(token) = session_cookie_value(parts, &state.config.auth.session.cookie_name) else {
            trace!("No session cookie present");
            return Err(Error::Unauthenticated { message: None });
        };

        let user = session::verify_session_token(token, &state.config)?;
        debug!("Found JWT session authenticated user: {}", user.id);
        Ok(user)
    }
}

/// No cookie means no user. A cookie that fails verification is still rejected.
impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Option<Self>> {
        match session_cookie_value(parts, &state.config.auth.session.cookie_name) {
            Some(token) => session::verify_session_token(token, &state.config).map(Some),
            None => Ok(None),
        }
    }
}

/// A signed-in user whose email address has been verified.
///
/// Loads the current record, so balance and pricing are fresh.
#[derive(Debug, Clone)]
pub struct VerifiedUser(pub UserDBResponse);

/// Load the stored record behind a session
pub async fn load_user(state: &AppState, current: &CurrentUser) -> Result<UserDBResponse> {
    state
        .db
        .get_user_by_id(current.id)
        .await?
        .ok_or_else(|| Error::Unauthenticated {
            message: Some("User no longer exists".to_string()),
        })
}

impl FromRequestParts<AppState> for VerifiedUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let current = <CurrentUser as FromRequestParts<AppState>>::from_request_parts(parts, state).await?;
        let user = load_user(state, &current).await?;
        if !user.verified {
            return Err(Error::EmailNotVerified);
        }
        Ok(VerifiedUser(user))
    }
}
