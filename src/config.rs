//! Service Configuration
//! Mission: Read settings from flags and environment, reject bad ones before binding
//!
//! Environment:
//!   BIND_ADDR - Listen address (default: 0.0.0.0:3000)
//!   JWT_ACCESS_SECRET / JWT_REFRESH_SECRET - Distinct signing secrets, >= 32 bytes
//!   ACCESS_TOKEN_TTL_MINUTES - Access token lifetime (default: 15)
//!   REFRESH_TOKEN_TTL_DAYS - Refresh token lifetime (default: 7)
//!   AUTH_DB_PATH - SQLite user database (default: studio_auth.db)
//!   COOKIE_SECURE - Mark session cookies Secure (default: true)
//!   CORS_ORIGIN - Browser origin allowed to send credentials (optional)
//!   {HEALTH,LOGIN,RENEW,SESSION}_RATE_LIMIT / _RATE_WINDOW_SECS - Per-route limits, windows <= 1 day

use crate::auth::{CookiePolicy, TokenCodec};
use crate::error::ConfigError;
use crate::middleware::RateLimitRule;
use crate::server::RateLimits;
use axum::http::HeaderValue;
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "studio-session")]
#[command(about = "Cookie session service: login, silent token renewal, role-gated routes")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,

    /// Secret for access tokens
    #[arg(long, env = "JWT_ACCESS_SECRET", hide_env_values = true)]
    pub jwt_access_secret: String,

    /// Secret for refresh tokens, must differ from the access secret
    #[arg(long, env = "JWT_REFRESH_SECRET", hide_env_values = true)]
    pub jwt_refresh_secret: String,

    #[arg(long, env = "ACCESS_TOKEN_TTL_MINUTES", default_value_t = 15)]
    pub access_token_ttl_minutes: u32,

    #[arg(long, env = "REFRESH_TOKEN_TTL_DAYS", default_value_t = 7)]
    pub refresh_token_ttl_days: u32,

    /// SQLite database holding user accounts
    #[arg(long, env = "AUTH_DB_PATH", default_value = "studio_auth.db")]
    pub auth_db_path: String,

    /// Mark session cookies Secure; disable only for plain-http development
    #[arg(long, env = "COOKIE_SECURE", default_value_t = true, action = ArgAction::Set)]
    pub cookie_secure: bool,

    /// Origin allowed to make credentialed cross-site requests
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    #[arg(long, env = "HEALTH_RATE_LIMIT", default_value_t = 100)]
    pub health_rate_limit: u32,

    #[arg(long, env = "HEALTH_RATE_WINDOW_SECS", default_value_t = 900)]
    pub health_rate_window_secs: u64,

    #[arg(long, env = "LOGIN_RATE_LIMIT", default_value_t = 10)]
    pub login_rate_limit: u32,

    #[arg(long, env = "LOGIN_RATE_WINDOW_SECS", default_value_t = 60)]
    pub login_rate_window_secs: u64,

    #[arg(long, env = "RENEW_RATE_LIMIT", default_value_t = 30)]
    pub renew_rate_limit: u32,

    #[arg(long, env = "RENEW_RATE_WINDOW_SECS", default_value_t = 60)]
    pub renew_rate_window_secs: u64,

    /// Limit for session lookup and logout
    #[arg(long, env = "SESSION_RATE_LIMIT", default_value_t = 120)]
    pub session_rate_limit: u32,

    #[arg(long, env = "SESSION_RATE_WINDOW_SECS", default_value_t = 60)]
    pub session_rate_window_secs: u64,

    /// Bootstrap admin, created only when no admin exists
    #[arg(long, env = "ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,

    /// Leave unset to skip the bootstrap
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl Config {
    pub fn token_codec(&self) -> Result<TokenCodec, ConfigError> {
        TokenCodec::new(
            &self.jwt_access_secret,
            &self.jwt_refresh_secret,
            chrono::Duration::minutes(i64::from(self.access_token_ttl_minutes)),
            chrono::Duration::days(i64::from(self.refresh_token_ttl_days)),
        )
    }

    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy {
            secure: self.cookie_secure,
        }
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            health: RateLimitRule::new(
                "health",
                self.health_rate_limit,
                Duration::from_secs(self.health_rate_window_secs),
            ),
            login: RateLimitRule::new(
                "login",
                self.login_rate_limit,
                Duration::from_secs(self.login_rate_window_secs),
            ),
            renew: RateLimitRule::new(
                "renew",
                self.renew_rate_limit,
                Duration::from_secs(self.renew_rate_window_secs),
            ),
            session: RateLimitRule::new(
                "session",
                self.session_rate_limit,
                Duration::from_secs(self.session_rate_window_secs),
            ),
        }
    }

    pub fn cors_origin(&self) -> Result<Option<HeaderValue>, ConfigError> {
        self.cors_origin
            .as_deref()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| ConfigError::InvalidOrigin(origin.to_string()))
            })
            .transpose()
    }

    /// Check everything that can be wrong before any socket or file is opened
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.token_codec()?;
        self.cors_origin()?;

        self.rate_limits()
            .rules()
            .try_for_each(|rule| rule.validate())?;
        Ok(())
    }
}
