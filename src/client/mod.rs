//! HTTP client side of the session: transparent access-token renewal

pub mod renewal;

pub use renewal::{ClientError, RenewalClient, RenewalClientBuilder, DEFAULT_RENEW_PATH};
