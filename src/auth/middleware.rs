//! Authentication Middleware
//! Mission: Verify the access-token cookie and attach the caller's identity

use crate::auth::{
    cookies::{remove_access_cookie, ACCESS_COOKIE_NAME},
    jwt::{TokenCodec, TokenError},
    models::{Identity, TokenKind},
};
use crate::error::{AuthError, ConfigError};
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use metrics::increment_counter;
use std::sync::Arc;
use tracing::{debug, error};

/// Inbound gate for protected routes.
///
/// `NoToken -> {Invalid, Expired, Valid}`: only `Valid` continues, every other
/// state ends the request with 401. `Expired` also clears the cookie so the
/// browser stops replaying a dead token.
pub struct AuthGate {
    codec: Arc<TokenCodec>,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    /// Resolve the access-token cookie to an identity
    pub fn check(&self, jar: &CookieJar) -> Result<Identity, AuthError> {
        let token = jar
            .get(ACCESS_COOKIE_NAME)
            .map(|c| c.value())
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::Unauthenticated)?;

        match self.codec.verify(token, TokenKind::Access) {
            Ok(subject_id) => Ok(Identity::new(subject_id)),
            Err(TokenError::Expired) => Err(AuthError::TokenExpired),
            Err(TokenError::Invalid) => Err(AuthError::TokenInvalid),
        }
    }
}

/// Auth middleware that validates the access-token cookie. Mounted through [`crate::auth::Guard`].
pub(crate) async fn auth_middleware(
    State(gate): State<Arc<AuthGate>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    match gate.check(&jar) {
        Ok(identity) => {
            increment_counter!("session_authorized_total");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(AuthError::TokenExpired) => {
            increment_counter!("session_unauthorized_total");
            debug!(path = %req.uri().path(), "Access token expired, clearing cookie");
            (remove_access_cookie(jar), AuthError::TokenExpired).into_response()
        }
        Err(err) => {
            // Tampered or malformed cookies are left in place.
            increment_counter!("session_unauthorized_total");
            debug!(path = %req.uri().path(), "Rejected request: {}", err);
            err.into_response()
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Identity>().cloned().ok_or_else(|| {
            error!(
                path = %parts.uri.path(),
                "Identity requested on a route without the auth gate"
            );
            AuthError::Configuration(ConfigError::MissingIdentity)
        })
    }
}
