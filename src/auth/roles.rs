//! Role Gate
//! Mission: Restrict routes to a fixed set of user roles

use crate::auth::{
    models::{AuthorizedUser, Identity, User, UserRole},
    user_store::UserDirectory,
};
use crate::error::{AuthError, ConfigError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

pub struct RoleGate {
    allowed: HashSet<UserRole>,
    users: Arc<dyn UserDirectory>,
}

impl RoleGate {
    /// Fails when `allowed` is empty: such a gate would block every caller.
    pub fn new(
        allowed: impl IntoIterator<Item = UserRole>,
        users: Arc<dyn UserDirectory>,
    ) -> Result<Self, ConfigError> {
        let allowed: HashSet<UserRole> = allowed.into_iter().collect();
        if allowed.is_empty() {
            return Err(ConfigError::EmptyRoleSet);
        }
        Ok(Self { allowed, users })
    }

    pub fn allows(&self, role: UserRole) -> bool {
        self.allowed.contains(&role)
    }

    /// Resolve the identity to a user and check its role.
    ///
    /// A vanished account is 401, the same answer as a missing token, so the
    /// response never reveals whether the account existed.
    pub async fn authorize(&self, identity: &Identity) -> Result<User, AuthError> {
        let user = self
            .users
            .find_user_by_id(identity.subject_id())
            .await
            .map_err(|e| {
                error!("User lookup failed: {:#}", e);
                AuthError::Internal
            })?
            .ok_or(AuthError::Unauthenticated)?;

        if !self.allows(user.role) {
            debug!(user = %user.id, role = %user.role, "Role not allowed");
            return Err(AuthError::Unauthorized);
        }

        Ok(user)
    }
}

/// Role middleware. Only [`crate::auth::Guard`] mounts it, always behind the auth gate.
pub(crate) async fn role_middleware(
    State(gate): State<Arc<RoleGate>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(identity) = req.extensions().get::<Identity>().cloned() else {
        error!(path = %req.uri().path(), "Role gate reached without an identity");
        return AuthError::Configuration(ConfigError::MissingIdentity).into_response();
    };

    match gate.authorize(&identity).await {
        Ok(user) => {
            req.extensions_mut().insert(AuthorizedUser(user));
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user_store::SqliteUserStore;
    use axum::{
        body::{to_bytes, Body},
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn store() -> (SqliteUserStore, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteUserStore::new(temp.path().to_str().unwrap()).unwrap();
        (store, temp)
    }

    #[test]
    fn test_empty_role_set_rejected_at_construction() {
        let (store, _temp) = store();
        let result = RoleGate::new(Vec::new(), Arc::new(store));
        assert!(matches!(result, Err(ConfigError::EmptyRoleSet)));
    }

    #[tokio::test]
    async fn test_authorize_by_role() {
        let (store, _temp) = store();
        let admin = store.create_user("admin1", "pw", UserRole::Admin).unwrap();
        let viewer = store.create_user("viewer1", "pw", UserRole::Viewer).unwrap();
        let gate = RoleGate::new([UserRole::Admin, UserRole::Editor], Arc::new(store)).unwrap();

        let user = gate.authorize(&Identity::new(admin.id.clone())).await.unwrap();
        assert_eq!(user.id, admin.id);

        let denied = gate.authorize(&Identity::new(viewer.id)).await;
        assert!(matches!(denied, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_unknown_subject_is_unauthenticated() {
        let (store, _temp) = store();
        let gate = RoleGate::new([UserRole::Admin], Arc::new(store)).unwrap();

        let result = gate.authorize(&Identity::new("ghost".to_string())).await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_role_gate_without_identity_is_internal_error() {
        let (store, _temp) = store();
        let gate = Arc::new(RoleGate::new([UserRole::Admin], Arc::new(store)).unwrap());
        let app = Router::new()
            .route("/v1/story-step", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(gate, role_middleware));

        let request = HttpRequest::builder()
            .uri("/v1/story-step")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "message": "Internal server error" }));
    }
}
