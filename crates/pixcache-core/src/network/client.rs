//! Authenticated JSON client for the app API.
//!
//! Every response's `X-RateLimit-*` headers are folded into a
//! [`RateLimitState`]. While the remaining quota sits under a tenth of the
//! window, requests are paced. Non-2xx statuses become [`PixError`]s, with
//! 429 mapped to `RateLimited`.

use crate::config::NetworkConfig;
use crate::error::{PixError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Last known quota window, as reported by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    /// Unix time at which the window resets.
    pub reset: Option<u64>,
}

impl RateLimitState {
    /// Overwrite the fields present in `headers`; absent ones are kept.
    pub fn absorb(&mut self, headers: &HeaderMap) {
        let field = |name: &str| header_number(headers, name);
        self.remaining = field("x-ratelimit-remaining").or(self.remaining);
        self.limit = field("x-ratelimit-limit").filter(|l| *l > 0).or(self.limit);
        self.reset = field("x-ratelimit-reset").or(self.reset);
    }

    /// Whether the quota is nearly spent (under 10% left, at least 1).
    pub fn is_low(&self) -> bool {
        let (Some(remaining), Some(limit)) = (self.remaining, self.limit) else {
            return false;
        };
        remaining < (limit / 10).max(1)
    }

    /// Time left in the current window, if the reset lies ahead.
    pub fn until_reset(&self, now_unix: u64) -> Option<Duration> {
        self.reset
            .filter(|reset| *reset > now_unix)
            .map(|reset| Duration::from_secs(reset - now_unix))
    }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// HTTP client for the upstream JSON API.
pub struct ApiClient {
    client: Client,
    base_url: Url,
    access_token: RwLock<Option<String>>,
    rate_limit: Mutex<RateLimitState>,
    timeout: Duration,
    pace_delay: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, NetworkConfig::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| PixError::Config {
            message: format!("Invalid API base URL {}: {}", base_url, e),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| PixError::Network {
                message: format!("Cannot build HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            base_url,
            access_token: RwLock::new(None),
            rate_limit: Mutex::new(RateLimitState::default()),
            timeout,
            pace_delay: NetworkConfig::THROTTLE_DELAY,
        })
    }

    pub fn with_access_token(self, token: Option<String>) -> Self {
        self.set_access_token(token);
        self
    }

    /// Replace the bearer token used for subsequent requests.
    pub fn set_access_token(&self, token: Option<String>) {
        match self.access_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn bearer(&self) -> Option<String> {
        match self.access_token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build an absolute endpoint URL with query parameters.
    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let mut url = self.base_url.join(path).map_err(|e| PixError::Config {
            message: format!("Invalid endpoint path {}: {}", path, e),
        })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url.into())
    }

    /// Reject URLs pointing anywhere but the configured API host.
    ///
    /// Continuation URLs come from response bodies; the bearer token must
    /// not follow them off-host.
    pub fn check_same_origin(&self, url: &str) -> Result<()> {
        let parsed = Url::parse(url).map_err(|e| PixError::Validation {
            field: "cursor".into(),
            message: format!("not a URL ({}): {}", e, url),
        })?;
        if parsed.origin() != self.base_url.origin() {
            return Err(PixError::Validation {
                field: "cursor".into(),
                message: format!("{} is not on {}", url, self.base_url),
            });
        }
        Ok(())
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        match self.rate_limit.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// GET `url` and decode the body as JSON.
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        self.check_same_origin(url)?;
        self.pace().await;

        let mut request = self.client.get(url);
        if let Some(token) = self.bearer() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PixError::Timeout(self.timeout)
            } else {
                PixError::Network {
                    message: format!("GET {} failed: {}", url, e),
                    cause: Some(e.to_string()),
                }
            }
        })?;

        self.record_quota(response.headers());
        let response = into_success(response, &self.service()).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Host name used to label rate-limit errors.
    fn service(&self) -> String {
        self.base_url.host_str().unwrap_or("upstream").to_string()
    }

    /// Sleep before a request while the quota is low: until the window
    /// resets, but never more than four pace delays.
    async fn pace(&self) {
        let state = self.rate_limit_state();
        if !state.is_low() {
            return;
        }
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let cap = self.pace_delay * 4;
        let wait = state.until_reset(now).map_or(self.pace_delay, |w| w.min(cap));
        warn!(
            "quota low ({:?} of {:?} left), pausing {:?}",
            state.remaining, state.limit, wait
        );
        tokio::time::sleep(wait).await;
    }

    fn record_quota(&self, headers: &HeaderMap) {
        let mut state = match self.rate_limit.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.absorb(headers);
        if let (Some(remaining), Some(limit)) = (state.remaining, state.limit) {
            debug!("quota: {} of {} left", remaining, limit);
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.bearer().is_some())
            .field("rate_limit", &self.rate_limit_state())
            .finish()
    }
}

async fn into_success(response: Response, service: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(PixError::RateLimited {
            service: service.to_string(),
            retry_after_secs: header_number(response.headers(), RETRY_AFTER.as_str()),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(PixError::Upstream {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Pull a readable message out of an upstream error body.
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .or_else(|| error.get("user_message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        });
    from_json.unwrap_or_else(|| body.chars().take(200).collect())
}
