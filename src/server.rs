//! HTTP Server Assembly
//! Mission: Wire the rate limiter, gates and session endpoints into one router
//!
//! Per request the layers run as: request logging, CORS, rate limiter,
//! auth gate, role gate, handler.

use crate::auth::{
    api::{self, AuthState},
    cookies::RENEW_PATH,
    AuthGate, Guard,
};
use crate::error::ConfigError;
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitRule, RateLimiter, RateWindowStore};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

const CORS_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-route limits for the public endpoints
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub health: RateLimitRule,
    pub login: RateLimitRule,
    pub renew: RateLimitRule,
    /// Session lookup and logout
    pub session: RateLimitRule,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            health: RateLimitRule::new("health", 100, Duration::from_secs(15 * 60)),
            login: RateLimitRule::new("login", 10, Duration::from_secs(60)),
            renew: RateLimitRule::new("renew", 30, Duration::from_secs(60)),
            session: RateLimitRule::new("session", 120, Duration::from_secs(60)),
        }
    }
}

impl RateLimits {
    pub fn rules(&self) -> impl Iterator<Item = &RateLimitRule> {
        [&self.health, &self.login, &self.renew, &self.session].into_iter()
    }

    pub fn longest_window(&self) -> Duration {
        self.rules()
            .map(|rule| rule.window)
            .max()
            .unwrap_or_default()
    }
}

/// Everything the router needs, shareable with callers that mount their own
/// protected routes.
#[derive(Clone)]
pub struct SessionServer {
    auth: AuthState,
    gate: Arc<AuthGate>,
    windows: Arc<RateWindowStore>,
    limits: RateLimits,
    cors_origin: Option<HeaderValue>,
    metrics: Option<PrometheusHandle>,
}

impl SessionServer {
    pub fn new(auth: AuthState, limits: RateLimits) -> Self {
        let gate = Arc::new(AuthGate::new(auth.codec.clone()));
        Self {
            auth,
            gate,
            windows: Arc::new(RateWindowStore::new()),
            limits,
            cors_origin: None,
            metrics: None,
        }
    }

    pub fn with_cors_origin(mut self, origin: HeaderValue) -> Self {
        self.cors_origin = Some(origin);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    /// Shared counters; the binary purges them periodically
    pub fn rate_windows(&self) -> Arc<RateWindowStore> {
        self.windows.clone()
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Auth-gated protection for application routes; add roles with
    /// [`Guard::require_roles`].
    pub fn guard(&self) -> Guard {
        Guard::authenticated(self.gate.clone())
    }

    /// Limiter for an application route, counted in the shared store
    pub fn limiter(&self, rule: RateLimitRule) -> Result<RateLimiter, ConfigError> {
        RateLimiter::new(rule, self.windows.clone())
    }

    /// Build the full application.
    ///
    /// `protected` is merged as-is; guard and limit it with [`Self::guard`]
    /// and [`rate_limited`] before passing it in.
    pub fn router(&self, protected: Router) -> Result<Router, ConfigError> {
        let health = rate_limited(
            Router::new().route("/v1/health", get(health_check)),
            self.limiter(self.limits.health.clone())?,
        );
        let login = rate_limited(
            Router::new().route("/v1/auth/login", post(api::login)),
            self.limiter(self.limits.login.clone())?,
        );
        let renew = rate_limited(
            Router::new().route(RENEW_PATH, get(api::renew)),
            self.limiter(self.limits.renew.clone())?,
        );
        let session = rate_limited(
            self.guard()
                .apply(Router::new().route("/v1/auth/me", get(api::me)))
                .route("/v1/auth/logout", post(api::logout)),
            self.limiter(self.limits.session.clone())?,
        );

        let mut app = Router::new()
            .merge(health)
            .merge(login)
            .merge(renew)
            .merge(session)
            .with_state(self.auth.clone())
            .merge(protected);

        if let Some(handle) = self.metrics.clone() {
            app = app.route("/metrics", get(move || async move { handle.render() }));
        }

        if let Some(origin) = self.cors_origin.clone() {
            // Credentialed CORS needs an explicit origin, never a wildcard.
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods([
                        Method::GET,
                        Method::POST,
                        Method::PUT,
                        Method::DELETE,
                        Method::OPTIONS,
                    ])
                    .allow_headers([header::CONTENT_TYPE])
                    .max_age(CORS_MAX_AGE),
            );
        }

        Ok(app.layer(middleware::from_fn(request_logging)))
    }
}

/// Put `limiter` in front of every route currently in `router`.
///
/// Call after [`Guard::apply`] so throttling runs before token checks.
pub fn rate_limited<S>(router: Router<S>, limiter: RateLimiter) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
