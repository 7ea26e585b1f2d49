//! Authentication API Endpoints
//! Mission: Provide login, silent renewal, logout and session lookup

use crate::auth::{
    cookies::{remove_access_cookie, remove_refresh_cookie, CookiePolicy, REFRESH_COOKIE_NAME},
    jwt::{TokenCodec, TokenError},
    models::{Identity, LoginRequest, TokenKind, User, UserResponse},
    user_store::UserDirectory,
};
use crate::error::AuthError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use metrics::increment_counter;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub codec: Arc<TokenCodec>,
    pub users: Arc<dyn UserDirectory>,
    pub cookies: CookiePolicy,
}

impl AuthState {
    pub fn new(codec: Arc<TokenCodec>, users: Arc<dyn UserDirectory>, cookies: CookiePolicy) -> Self {
        Self {
            codec,
            users,
            cookies,
        }
    }

    fn issue(&self, subject_id: &str, kind: TokenKind) -> Result<String, AuthError> {
        self.codec
            .issue(subject_id, kind)
            .map_err(|_| AuthError::Internal)
    }

    async fn lookup(&self, subject_id: &str) -> Result<Option<User>, AuthError> {
        self.users.find_user_by_id(subject_id).await.map_err(|e| {
            error!("User lookup failed: {:#}", e);
            AuthError::Internal
        })
    }
}

/// Login endpoint - POST /v1/auth/login
///
/// Sets both session cookies; they always carry the same subject.
pub async fn login(
    State(state): State<AuthState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<UserResponse>), AuthError> {
    let user = state
        .users
        .authenticate(&payload.username, &payload.password)
        .await
        .map_err(|e| {
            error!("Credential check failed: {:#}", e);
            AuthError::Internal
        })?;

    let Some(user) = user else {
        warn!("Failed login attempt: {}", payload.username);
        return Err(AuthError::InvalidCredentials);
    };

    let access = state.issue(&user.id, TokenKind::Access)?;
    let refresh = state.issue(&user.id, TokenKind::Refresh)?;

    info!("Login successful: {} ({})", user.username, user.role);

    let jar = jar
        .add(
            state
                .cookies
                .access_cookie(access, state.codec.ttl(TokenKind::Access)),
        )
        .add(
            state
                .cookies
                .refresh_cookie(refresh, state.codec.ttl(TokenKind::Refresh)),
        );

    Ok((jar, Json(UserResponse::from_user(&user))))
}

/// Renewal endpoint - GET /v1/auth/token/renew
///
/// Trades a valid refresh cookie for a fresh access cookie. Only ever called
/// by clients recovering from an expired access token.
pub async fn renew(State(state): State<AuthState>, jar: CookieJar) -> Response {
    match renew_access_token(&state, &jar).await {
        Ok(access) => {
            increment_counter!("token_renewals_total", "outcome" => "renewed");
            let cookie = state
                .cookies
                .access_cookie(access, state.codec.ttl(TokenKind::Access));
            (jar.add(cookie), Json(json!({ "message": "Token renewed" }))).into_response()
        }
        Err(AuthError::TokenExpired) => {
            increment_counter!("token_renewals_total", "outcome" => "expired");
            debug!("Refresh token expired, clearing cookie");
            (remove_refresh_cookie(jar), AuthError::TokenExpired).into_response()
        }
        Err(err) => {
            increment_counter!("token_renewals_total", "outcome" => "rejected");
            err.into_response()
        }
    }
}

async fn renew_access_token(state: &AuthState, jar: &CookieJar) -> Result<String, AuthError> {
    let token = jar
        .get(REFRESH_COOKIE_NAME)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::Unauthenticated)?;

    let subject_id = state
        .codec
        .verify(token, TokenKind::Refresh)
        .map_err(|e| match e {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::Invalid => AuthError::TokenInvalid,
        })?;

    // Deleted accounts must not keep minting access tokens.
    if state.lookup(&subject_id).await?.is_none() {
        warn!(subject = %subject_id, "Refresh token for unknown user");
        return Err(AuthError::Unauthenticated);
    }

    let access = state.issue(&subject_id, TokenKind::Access)?;
    info!(subject = %subject_id, "Access token renewed");
    Ok(access)
}

/// Logout endpoint - POST /v1/auth/logout
pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    let jar = remove_refresh_cookie(remove_access_cookie(jar));
    (jar, StatusCode::NO_CONTENT)
}

/// Current session - GET /v1/auth/me (behind the auth gate)
pub async fn me(
    State(state): State<AuthState>,
    identity: Identity,
) -> Result<Json<UserResponse>, AuthError> {
    let user = state
        .lookup(identity.subject_id())
        .await?
        .ok_or(AuthError::Unauthenticated)?;

    Ok(Json(UserResponse::from_user(&user)))
}
