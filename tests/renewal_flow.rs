//! End-to-end session tests
//!
//! Runs the real router on an ephemeral port and drives it with the renewal
//! client, counting how often each endpoint is hit.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Extension, Router,
};
use chrono::{Duration, Utc};
use reqwest::{cookie::Jar, Method, StatusCode, Url};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;

use studio_session::auth::{
    AuthState, AuthorizedUser, CookiePolicy, RoleGate, SqliteUserStore, TokenCodec, TokenKind,
    User, UserRole,
};
use studio_session::client::RenewalClient;
use studio_session::server::{RateLimits, SessionServer};

const STORY: &str = "/v1/story-step";
const RENEW: &str = "/v1/auth/token/renew";

#[derive(Default)]
struct Hits {
    story: AtomicUsize,
    renew: AtomicUsize,
}

async fn count_hits(State(hits): State<Arc<Hits>>, request: Request, next: Next) -> Response {
    match request.uri().path() {
        STORY => hits.story.fetch_add(1, Ordering::SeqCst),
        RENEW => hits.renew.fetch_add(1, Ordering::SeqCst),
        _ => 0,
    };
    next.run(request).await
}

async fn story_step(Extension(AuthorizedUser(user)): Extension<AuthorizedUser>) -> String {
    format!("next step for {}", user.username)
}

struct Harness {
    addr: SocketAddr,
    codec: Arc<TokenCodec>,
    store: SqliteUserStore,
    hits: Arc<Hits>,
    _temp: NamedTempFile,
}

impl Harness {
    async fn start() -> Self {
        let temp = NamedTempFile::new().unwrap();
        let store = SqliteUserStore::new(temp.path().to_str().unwrap()).unwrap();
        let codec = Arc::new(
            TokenCodec::new(
                "integration-access-secret-0123456789abcdef",
                "integration-refresh-secret-0123456789abcdef",
                Duration::minutes(15),
                Duration::days(7),
            )
            .unwrap(),
        );

        let auth = AuthState::new(
            codec.clone(),
            Arc::new(store.clone()),
            CookiePolicy { secure: false },
        );
        let server = SessionServer::new(auth, RateLimits::default());

        let editors =
            RoleGate::new([UserRole::Admin, UserRole::Editor], Arc::new(store.clone())).unwrap();
        let protected = server
            .guard()
            .require_roles(editors)
            .apply(Router::new().route(STORY, get(story_step)));

        let hits = Arc::new(Hits::default());
        let app = server
            .router(protected)
            .unwrap()
            .layer(middleware::from_fn_with_state(hits.clone(), count_hits));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            codec,
            store,
            hits,
            _temp: temp,
        }
    }

    fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    /// Client whose jar already holds the given session cookies
    fn client_with(&self, access: Option<String>, refresh: Option<String>) -> RenewalClient {
        let jar = Arc::new(Jar::default());
        let url = self.base_url();
        if let Some(access) = access {
            jar.add_cookie_str(&format!("access_token={access}; Path=/v1"), &url);
        }
        if let Some(refresh) = refresh {
            jar.add_cookie_str(&format!("refresh_token={refresh}; Path={RENEW}"), &url);
        }
        RenewalClient::builder(url.as_str())
            .cookie_jar(jar)
            .build()
            .unwrap()
    }

    fn user(&self, name: &str, role: UserRole) -> User {
        self.store.create_user(name, "correct horse", role).unwrap()
    }

    fn expired_access(&self, user: &User) -> String {
        self.codec
            .issue_at(&user.id, TokenKind::Access, Utc::now() - Duration::minutes(16))
            .unwrap()
    }

    fn story_hits(&self) -> usize {
        self.hits.story.load(Ordering::SeqCst)
    }

    fn renew_hits(&self) -> usize {
        self.hits.renew.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_expired_access_token_renewed_transparently() {
    let harness = Harness::start().await;
    let user = harness.user("writer", UserRole::Editor);
    let refresh = harness.codec.issue(&user.id, TokenKind::Refresh).unwrap();
    let client = harness.client_with(Some(harness.expired_access(&user)), Some(refresh));

    let response = client.get(STORY).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "next step for writer");

    assert_eq!(harness.story_hits(), 2);
    assert_eq!(harness.renew_hits(), 1);

    // The renewed cookie is reused without another renewal.
    let response = client.get(STORY).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.story_hits(), 3);
    assert_eq!(harness.renew_hits(), 1);
}

#[tokio::test]
async fn test_expired_refresh_token_surfaces_401() {
    let harness = Harness::start().await;
    let user = harness.user("writer", UserRole::Editor);
    let refresh = harness
        .codec
        .issue_at(&user.id, TokenKind::Refresh, Utc::now() - Duration::days(8))
        .unwrap();
    let client = harness.client_with(Some(harness.expired_access(&user)), Some(refresh));

    let response = client.get(STORY).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Unauthorized" }));

    assert_eq!(harness.story_hits(), 1);
    assert_eq!(harness.renew_hits(), 1);
}

#[tokio::test]
async fn test_wrong_role_is_not_renewed() {
    let harness = Harness::start().await;
    let user = harness.user("reader", UserRole::Viewer);
    let access = harness.codec.issue(&user.id, TokenKind::Access).unwrap();
    let refresh = harness.codec.issue(&user.id, TokenKind::Refresh).unwrap();
    let client = harness.client_with(Some(access), Some(refresh));

    let response = client.get(STORY).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(harness.story_hits(), 1);
    assert_eq!(harness.renew_hits(), 0);
}

#[tokio::test]
async fn test_renew_endpoint_is_never_retried() {
    let harness = Harness::start().await;
    let client = harness.client_with(None, None);

    let response = client.get(RENEW).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(harness.renew_hits(), 1);
}

#[tokio::test]
async fn test_login_then_session_lookup() {
    let harness = Harness::start().await;
    harness.user("writer", UserRole::Editor);
    let client = harness.client_with(None, None);

    let login = client
        .request(Method::POST, "/v1/auth/login")
        .unwrap()
        .json(&json!({ "username": "writer", "password": "correct horse" }));
    let response = client.send(login).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let me: Value = client.get("/v1/auth/me").await.unwrap().json().await.unwrap();
    assert_eq!(me["username"], "writer");
    assert_eq!(me["role"], "editor");

    let response = client.get(STORY).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.renew_hits(), 0);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let harness = Harness::start().await;
    harness.user("writer", UserRole::Editor);
    let client = harness.client_with(None, None);

    let login = client
        .request(Method::POST, "/v1/auth/login")
        .unwrap()
        .json(&json!({ "username": "writer", "password": "correct horse" }));
    assert_eq!(client.send(login).await.unwrap().status(), StatusCode::OK);

    let logout = client.request(Method::POST, "/v1/auth/logout").unwrap();
    assert_eq!(
        client.send(logout).await.unwrap().status(),
        StatusCode::NO_CONTENT
    );

    // Both cookies are gone, so the renewal attempt fails as well.
    let response = client.get("/v1/auth/me").await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(harness.renew_hits(), 1);
}
