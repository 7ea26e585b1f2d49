//! Middleware for request logging and rate limiting.

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{
    client_key, rate_limit_middleware, RateLimitRule, RateLimitStatus, RateLimiter,
    RateWindowStore,
};
