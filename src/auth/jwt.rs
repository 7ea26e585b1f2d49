//! Token Codec
//! Mission: Issue and verify access/refresh JWTs with independent secrets

use crate::auth::models::{Claims, TokenKind};
use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

pub const MIN_SECRET_LEN: usize = 32;

/// Why a token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("expired token")]
    Expired,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Signs and verifies session tokens.
///
/// Access and refresh tokens use distinct secrets and carry their kind in the
/// `typ` claim, so one can never be verified as the other.
pub struct TokenCodec {
    access: KeyPair,
    refresh: KeyPair,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        check_secret("access", access_secret)?;
        check_secret("refresh", refresh_secret)?;
        if access_secret == refresh_secret {
            return Err(ConfigError::SharedSecret);
        }
        if access_ttl <= Duration::zero() {
            return Err(ConfigError::ZeroValue("access token TTL"));
        }
        if refresh_ttl <= Duration::zero() {
            return Err(ConfigError::ZeroValue("refresh token TTL"));
        }

        // Expiry is checked by hand against an injectable clock, with no leeway.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            access: KeyPair::new(access_secret, access_ttl),
            refresh: KeyPair::new(refresh_secret, refresh_ttl),
            validation,
        })
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        self.keys(kind).ttl
    }

    /// Issue a token of `kind` for `subject_id`, valid from now
    pub fn issue(&self, subject_id: &str, kind: TokenKind) -> Result<String, TokenError> {
        self.issue_at(subject_id, kind, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject_id: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let keys = self.keys(kind);
        let claims = Claims {
            sub: subject_id.to_string(),
            iat: now.timestamp(),
            exp: (now + keys.ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
            typ: kind,
        };

        debug!(
            subject = subject_id,
            kind = kind.as_str(),
            exp = claims.exp,
            "Issuing token"
        );

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).map_err(|e| {
            error!("Failed to encode {} token: {}", kind.as_str(), e);
            TokenError::Invalid
        })
    }

    /// Verify a token of `kind` and return its subject id
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<String, TokenError> {
        self.verify_at(token, kind, Utc::now())
    }

    pub fn verify_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = decode::<Claims>(token, &self.keys(kind).decoding, &self.validation)
            .map_err(|e| {
                debug!(kind = kind.as_str(), "Rejected token: {}", e);
                TokenError::Invalid
            })?
            .claims;

        if claims.typ != kind {
            debug!(
                expected = kind.as_str(),
                found = claims.typ.as_str(),
                "Rejected token of the wrong kind"
            );
            return Err(TokenError::Invalid);
        }

        if now.timestamp() > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims.sub)
    }
}

fn check_secret(name: &'static str, secret: &str) -> Result<(), ConfigError> {
    if secret.is_empty() {
        return Err(ConfigError::EmptySecret(name));
    }
    if secret.len() < MIN_SECRET_LEN {
        return Err(ConfigError::WeakSecret {
            name,
            min: MIN_SECRET_LEN,
        });
    }
    Ok(())
}
