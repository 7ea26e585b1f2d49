//! Renewal Client
//! Mission: Make access-token expiry invisible to HTTP callers, without looping
//!
//! Every request runs through a four-phase machine:
//!
//! ```text
//! Sent --(non-401)--------------------------------> done
//!   |
//!  401
//!   v
//! Unauthorized --(renew endpoint / body not replayable)--> done (401)
//!   |
//!   v
//! Renewing --(renewal failed)----------------------> done (original 401)
//!   |
//!   v
//! Retried ----------------------------------------> done (whatever status)
//! ```
//!
//! Phases only move forward and `Retried` consumes the single replay copy of
//! the request, so one request costs at most one renewal and one retry.

use reqwest::{cookie::Jar, Client, Method, Request, RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_RENEW_PATH: &str = "/v1/auth/token/renew";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

enum Phase {
    Sent(Request),
    Unauthorized {
        original: Response,
        replay: Option<Request>,
        targets_renewal: bool,
    },
    Renewing {
        original: Response,
        replay: Request,
    },
    Retried(Request),
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Sent(_) => "sent",
            Phase::Unauthorized { .. } => "unauthorized",
            Phase::Renewing { .. } => "renewing",
            Phase::Retried(_) => "retried",
        }
    }
}

pub struct RenewalClientBuilder {
    base_url: String,
    renew_path: String,
    timeout: Duration,
    jar: Option<Arc<Jar>>,
}

impl RenewalClientBuilder {
    pub fn renew_path(mut self, path: impl Into<String>) -> Self {
        self.renew_path = path.into();
        self
    }

    /// Per-round-trip timeout. The expired-token path makes up to three
    /// round trips, so budget for a multiple of this.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a cookie jar, e.g. to seed cookies from an existing session
    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn build(self) -> Result<RenewalClient, ClientError> {
        let mut base_url =
            Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        // A trailing slash keeps a mount prefix such as `/api` when joining.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let renew_url = join(&base_url, &self.renew_path)?;
        let jar = self.jar.unwrap_or_default();

        let http = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(self.timeout)
            .build()?;

        Ok(RenewalClient {
            http,
            base_url,
            renew_url,
            jar,
        })
    }
}

/// HTTP client that silently renews an expired access token once per request.
#[derive(Clone)]
pub struct RenewalClient {
    http: Client,
    base_url: Url,
    renew_url: Url,
    jar: Arc<Jar>,
}

impl RenewalClient {
    pub fn builder(base_url: impl Into<String>) -> RenewalClientBuilder {
        RenewalClientBuilder {
            base_url: base_url.into(),
            renew_path: DEFAULT_RENEW_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            jar: None,
        }
    }

    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder(base_url).build()
    }

    pub fn cookie_jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Resolve `path` under the base URL, keeping any path prefix of the base
    /// (`http://host/api` + `/v1/health` is `http://host/api/v1/health`).
    pub fn url(&self, path: &str) -> Result<Url, ClientError> {
        join(&self.base_url, path)
    }

    /// Start a request against `path`; send it with [`RenewalClient::send`]
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ClientError> {
        Ok(self.http.request(method, self.url(path)?))
    }

    pub async fn get(&self, path: &str) -> Result<Response, ClientError> {
        self.send(self.request(Method::GET, path)?).await
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ClientError> {
        self.execute(builder.build()?).await
    }

    fn targets_renewal(&self, url: &Url) -> bool {
        url.path().trim_end_matches('/') == self.renew_url.path().trim_end_matches('/')
    }

    /// Run `request` through the renewal state machine.
    ///
    /// Transport errors of the original request or the retry are returned as
    /// errors; every HTTP status is returned as a response.
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        let mut phase = Phase::Sent(request);

        loop {
            debug!(phase = phase.name(), "Renewal client step");
            phase = match phase {
                Phase::Sent(request) => {
                    let replay = request.try_clone();
                    let targets_renewal = self.targets_renewal(request.url());
                    let response = self.http.execute(request).await?;
                    if response.status() != StatusCode::UNAUTHORIZED {
                        return Ok(response);
                    }
                    Phase::Unauthorized {
                        original: response,
                        replay,
                        targets_renewal,
                    }
                }
                Phase::Unauthorized {
                    original,
                    replay,
                    targets_renewal,
                } => {
                    if targets_renewal {
                        debug!("Renewal endpoint itself returned 401, not renewing");
                        return Ok(original);
                    }
                    let Some(replay) = replay else {
                        warn!(url = %original.url(), "Request body cannot be replayed, skipping renewal");
                        return Ok(original);
                    };
                    Phase::Renewing { original, replay }
                }
                Phase::Renewing { original, replay } => {
                    if !self.renew().await {
                        return Ok(original);
                    }
                    Phase::Retried(replay)
                }
                Phase::Retried(replay) => return Ok(self.http.execute(replay).await?),
            };
        }
    }

    /// One call to the renewal endpoint; any non-2xx or transport error is a failure
    async fn renew(&self) -> bool {
        match self.http.get(self.renew_url.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Token has been renewed in the background");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), "Failed to renew token");
                false
            }
            Err(e) => {
                warn!("Failed to renew token: {}", e);
                false
            }
        }
    }
}

fn join(base: &Url, path: &str) -> Result<Url, ClientError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ClientError::InvalidUrl(e.to_string()))
}
