//! Studio Session Service
//! Mission: Serve login, silent renewal and the session endpoints behind rate limits

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use dotenv::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studio_session::auth::{AuthState, SqliteUserStore};
use studio_session::config::Config;
use studio_session::server::SessionServer;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::parse();
    config.validate().context("Invalid configuration")?;

    let codec = Arc::new(config.token_codec()?);
    let user_store = SqliteUserStore::new(&config.auth_db_path)?;
    if let Some(password) = &config.admin_password {
        user_store.ensure_admin(&config.admin_username, password)?;
    }
    info!("Authentication initialized at: {}", config.auth_db_path);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let auth = AuthState::new(codec, Arc::new(user_store), config.cookie_policy());
    let mut server = SessionServer::new(auth, config.rate_limits()).with_metrics(metrics);
    if let Some(origin) = config.cors_origin()? {
        server = server.with_cors_origin(origin);
    }

    spawn_rate_window_purge(&server);

    let app = server.router(Router::new())?;

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Session service listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Expired windows are otherwise only replaced when their key is hit again
fn spawn_rate_window_purge(server: &SessionServer) {
    let windows = server.rate_windows();
    let longest = server.limits().longest_window();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            windows.purge_expired(longest);
            debug!(live_windows = windows.len(), "Purged expired rate windows");
        }
    });
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studio_session=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard search (cwd + parents), then the crate root when run from elsewhere
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
