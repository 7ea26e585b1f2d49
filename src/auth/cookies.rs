//! Session cookies: names, paths and attributes for the two tokens.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Duration;

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

pub const API_ROOT_PATH: &str = "/v1";
pub const RENEW_PATH: &str = "/v1/auth/token/renew";

/// Attributes shared by both session cookies
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self { secure: true }
    }
}

impl CookiePolicy {
    pub fn access_cookie(&self, token: String, ttl: Duration) -> Cookie<'static> {
        self.build(ACCESS_COOKIE_NAME, token, API_ROOT_PATH, ttl)
    }

    /// Scoped to the renewal endpoint so browsers only send it there
    pub fn refresh_cookie(&self, token: String, ttl: Duration) -> Cookie<'static> {
        self.build(REFRESH_COOKIE_NAME, token, RENEW_PATH, ttl)
    }

    fn build(
        &self,
        name: &'static str,
        value: String,
        path: &'static str,
        ttl: Duration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .path(path)
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(cookie::time::Duration::seconds(ttl.num_seconds()))
            .build()
    }
}

/// Always emits a removal cookie, even when the request did not carry one:
/// the refresh cookie never reaches endpoints outside its path.
fn removal(name: &'static str, path: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, "")).path(path).http_only(true).build();
    cookie.make_removal();
    cookie
}

pub fn remove_access_cookie(jar: CookieJar) -> CookieJar {
    jar.add(removal(ACCESS_COOKIE_NAME, API_ROOT_PATH))
}

pub fn remove_refresh_cookie(jar: CookieJar) -> CookieJar {
    jar.add(removal(REFRESH_COOKIE_NAME, RENEW_PATH))
}
