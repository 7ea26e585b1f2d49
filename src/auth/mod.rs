//! Authentication Module
//! Mission: Stateless cookie sessions with signed access/refresh tokens and role checks

pub mod api;
pub mod cookies;
pub mod guard;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod roles;
pub mod user_store;

pub use api::AuthState;
pub use cookies::CookiePolicy;
pub use guard::Guard;
pub use jwt::{TokenCodec, TokenError};
pub use middleware::AuthGate;
pub use models::{AuthorizedUser, Identity, TokenKind, User, UserRole};
pub use roles::RoleGate;
pub use user_store::{SqliteUserStore, UserDirectory};
