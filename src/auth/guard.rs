//! Composes the auth and role gates onto a router in their only valid order.

use crate::auth::{
    middleware::{auth_middleware, AuthGate},
    roles::{role_middleware, RoleGate},
};
use axum::{middleware, Router};
use std::sync::Arc;

/// Protection for a group of routes.
///
/// A role gate can only be attached to a guard that already carries an auth
/// gate, so the role check always sees an [`Identity`](crate::auth::Identity).
#[derive(Clone)]
pub struct Guard {
    auth: Arc<AuthGate>,
    roles: Option<Arc<RoleGate>>,
}

impl Guard {
    pub fn authenticated(auth: Arc<AuthGate>) -> Self {
        Self { auth, roles: None }
    }

    pub fn require_roles(mut self, gate: RoleGate) -> Self {
        self.roles = Some(Arc::new(gate));
        self
    }

    /// Layer the gates onto every route currently in `router`
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // route_layer wraps what is already there: the last layer runs first.
        let router = match self.roles {
            Some(roles) => router.route_layer(middleware::from_fn_with_state(roles, role_middleware)),
            None => router,
        };
        router.route_layer(middleware::from_fn_with_state(self.auth, auth_middleware))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        jwt::TokenCodec,
        models::{AuthorizedUser, TokenKind, UserRole},
        user_store::SqliteUserStore,
    };
    use axum::{
        body::Body,
        extract::Extension,
        http::{header, Request, StatusCode},
        routing::get,
    };
    use chrono::Duration;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    struct Fixture {
        codec: Arc<TokenCodec>,
        store: SqliteUserStore,
        _temp: NamedTempFile,
    }

    fn fixture() -> Fixture {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteUserStore::new(temp.path().to_str().unwrap()).unwrap();
        let codec = Arc::new(
            TokenCodec::new(
                "access-secret-for-tests-0123456789abcdef",
                "refresh-secret-for-tests-0123456789abcdef",
                Duration::minutes(15),
                Duration::days(7),
            )
            .unwrap(),
        );
        Fixture {
            codec,
            store,
            _temp: temp,
        }
    }

    async fn role_of(Extension(AuthorizedUser(user)): Extension<AuthorizedUser>) -> String {
        user.role.to_string()
    }

    fn router(fx: &Fixture) -> Router {
        let gate = RoleGate::new(
            [UserRole::Admin, UserRole::Editor],
            Arc::new(fx.store.clone()),
        )
        .unwrap();
        Guard::authenticated(Arc::new(AuthGate::new(fx.codec.clone())))
            .require_roles(gate)
            .apply(Router::new().route("/v1/story-step", get(role_of)))
    }

    async fn call(fx: &Fixture, subject: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri("/v1/story-step");
        if let Some(subject) = subject {
            let token = fx.codec.issue(subject, TokenKind::Access).unwrap();
            builder = builder.header(header::COOKIE, format!("access_token={token}"));
        }
        router(fx)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_admin_proceeds() {
        let fx = fixture();
        let admin = fx.store.create_user("a", "pw", UserRole::Admin).unwrap();
        assert_eq!(call(&fx, Some(&admin.id)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_viewer_forbidden() {
        let fx = fixture();
        let viewer = fx.store.create_user("v", "pw", UserRole::Viewer).unwrap();
        assert_eq!(call(&fx, Some(&viewer.id)).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_unknown_subject_unauthenticated() {
        let fx = fixture();
        assert_eq!(call(&fx, Some("no-such-user")).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_gate_runs_before_role_lookup() {
        let fx = fixture();
        assert_eq!(call(&fx, None).await, StatusCode::UNAUTHORIZED);
    }
}
