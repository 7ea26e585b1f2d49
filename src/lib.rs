//! Studio Session Library
//!
//! Cookie-based sessions for an axum backend: signed access/refresh tokens,
//! fixed-window rate limiting, auth and role gates, and an HTTP client that
//! renews expired access tokens transparently.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod middleware;
pub mod server;
