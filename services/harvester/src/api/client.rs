use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::models::{ApiProblem, Envelope, ProblemClass};
use crate::retry::RetryPolicy;

/// Documented per-request maxima of the remote API.
pub const TIMELINE_PAGE_MAX: u32 = 500;
pub const FOLLOWING_PAGE_MAX: u32 = 1000;
pub const LOOKUP_BATCH_MAX: u32 = 100;

#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub bearer_token: String,
    pub timeout_secs: u64,
    pub timeline_page_size: u32,
    pub following_page_size: u32,
    pub lookup_batch_size: u32,
    pub rate_limit: RetryPolicy,
    pub server_unavailable: RetryPolicy,
}

impl ApiClientConfig {
    /// Load API config from environment.
    ///
    /// `API_BEARER_TOKEN` is mandatory. Page sizes default to the documented
    /// maxima; a value above the maximum (or zero) is rejected rather than
    /// clamped.
    pub fn from_env() -> Result<Self, String> {
        let bearer_token = std::env::var("API_BEARER_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| "API_BEARER_TOKEN is required but not set".to_string())?;

        let base_url = std::env::var("API_BASE_URL")
            .unwrap_or_else(|_| "https://api.twitter.com".to_string());
        let timeout_secs = std::env::var("API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let rate_limit_secs = std::env::var("API_RATE_LIMIT_MAX_ELAPSED_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1800);
        let server_secs = std::env::var("API_SERVER_MAX_ELAPSED_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Ok(Self {
            base_url,
            bearer_token,
            timeout_secs,
            timeline_page_size: capped_size("API_TIMELINE_PAGE_SIZE", TIMELINE_PAGE_MAX)?,
            following_page_size: capped_size("API_FOLLOWING_PAGE_SIZE", FOLLOWING_PAGE_MAX)?,
            lookup_batch_size: capped_size("API_LOOKUP_BATCH_SIZE", LOOKUP_BATCH_MAX)?,
            rate_limit: RetryPolicy::rate_limit(Duration::from_secs(rate_limit_secs)),
            server_unavailable: RetryPolicy::server_unavailable(Duration::from_secs(server_secs)),
        })
    }
}

fn capped_size(env_key: &str, max: u32) -> Result<u32, String> {
    let raw = match std::env::var(env_key) {
        Ok(v) => v,
        Err(_) => return Ok(max),
    };
    let value: u32 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{env_key} must be a positive integer, got {raw:?}"))?;
    if value == 0 || value > max {
        return Err(format!("{env_key} must be between 1 and {max}, got {value}"));
    }
    Ok(value)
}

/// A fully formed GET: path relative to the base URL plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl PageRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
    pub result_count: Option<u64>,
    /// Partial-failure problems reported next to the data.
    pub problems: Vec<ApiProblem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Page(Page<T>),
    /// Zero items. Not an error; ends a walk.
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("rate limited; gave up after {attempts} retries over {waited:?}")]
    RateLimited { attempts: u32, waited: Duration },

    #[error("credentials rejected: {0}")]
    AuthFailure(String),

    #[error("server unavailable after {attempts} retries: {last_error}")]
    ServerUnavailable { attempts: u32, last_error: String },

    #[error("not authorized to view resource: {0}")]
    Private(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    /// A 200 body carrying only problems of some other kind.
    #[error("remote reported a problem: {0}")]
    Problem(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Outcome of one HTTP exchange before retry policy is applied.
enum Failure {
    RateLimited(Option<Duration>),
    Transient(String),
    Fatal(ClientError),
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    config: ApiClientConfig,
    cooldown: Arc<Mutex<Option<Instant>>>,
}

impl ApiClient {
    pub fn new(config: ApiClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            cooldown: Arc::new(Mutex::new(None)),
        })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// Issue one logical request, retrying rate limits and server failures
    /// per the configured policies. Every other failure returns at once.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        request: &PageRequest,
    ) -> Result<Fetched<T>, ClientError> {
        self.wait_out_cooldown().await;

        let mut rate_backoff = self.config.rate_limit.backoff();
        let mut server_backoff = self.config.server_unavailable.backoff();

        loop {
            let failure = match self.attempt::<T>(request).await {
                Ok(fetched) => return Ok(fetched),
                Err(failure) => failure,
            };

            match failure {
                Failure::RateLimited(hint) => {
                    if let Some(hint) = hint {
                        self.set_cooldown(hint);
                    }
                    let Some(delay) = rate_backoff.next_delay_at_least(hint.unwrap_or_default())
                    else {
                        return Err(ClientError::RateLimited {
                            attempts: rate_backoff.attempts(),
                            waited: rate_backoff.elapsed(),
                        });
                    };
                    tracing::warn!(
                        path = %request.path,
                        attempt = rate_backoff.attempts(),
                        delay_secs = delay.as_secs_f64(),
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Failure::Transient(reason) => {
                    let Some(delay) = server_backoff.next_delay() else {
                        return Err(ClientError::ServerUnavailable {
                            attempts: server_backoff.attempts(),
                            last_error: reason,
                        });
                    };
                    tracing::warn!(
                        path = %request.path,
                        attempt = server_backoff.attempts(),
                        delay_secs = delay.as_secs_f64(),
                        error = %reason,
                        "server unavailable, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Failure::Fatal(e) => return Err(e),
            }
        }
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        request: &PageRequest,
    ) -> Result<Fetched<T>, Failure> {
        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            request.path
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.bearer_token)
            .query(&request.query)
            .send()
            .await
            .map_err(|e| Failure::Transient(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Failure::RateLimited(reset_hint(response.headers())));
        }
        if status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(Failure::Fatal(ClientError::AuthFailure(body)));
        }
        if status.is_server_error() {
            return Err(Failure::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Failure::Fatal(ClientError::Malformed(format!(
                "HTTP {status}: {body}"
            ))));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Failure::Transient(e.to_string()))?;
        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            Failure::Fatal(ClientError::Malformed(format!("undecodable body: {e}")))
        })?;

        classify(envelope).map_err(Failure::Fatal)
    }

    async fn wait_out_cooldown(&self) {
        let until = match self.cooldown.lock() {
            Ok(guard) => *guard,
            Err(_) => None,
        };
        if let Some(until) = until {
            let wait = until
                .saturating_duration_since(Instant::now())
                .min(self.config.rate_limit.max_delay);
            if !wait.is_zero() {
                tracing::info!(wait_secs = wait.as_secs_f64(), "waiting out rate-limit window");
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn set_cooldown(&self, wait: Duration) {
        if let Ok(mut guard) = self.cooldown.lock() {
            *guard = Some(Instant::now() + wait);
        }
    }
}

/// Turn a decoded 200 body into a page, an empty result, or a per-resource error.
fn classify<T>(envelope: Envelope<T>) -> Result<Fetched<T>, ClientError> {
    let Envelope { data, meta, errors } = envelope;
    let items = data.unwrap_or_default();

    if !items.is_empty() {
        let meta = meta.unwrap_or_default();
        return Ok(Fetched::Page(Page {
            items,
            next_token: meta.next_token,
            result_count: meta.result_count,
            problems: errors,
        }));
    }

    if let Some(problem) = errors.first() {
        return Err(match problem.class() {
            ProblemClass::Private => ClientError::Private(problem.describe()),
            ProblemClass::NotFound => ClientError::NotFound(problem.describe()),
            ProblemClass::Other => ClientError::Problem(problem.describe()),
        });
    }

    if meta.is_none() {
        return Err(ClientError::Malformed(
            "response carries neither data nor meta".to_string(),
        ));
    }

    Ok(Fetched::Empty)
}

/// Seconds until the rate-limit window resets, from `x-rate-limit-reset`
/// (epoch seconds) or `retry-after` (delta seconds).
fn reset_hint(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(reset_at) = header("x-rate-limit-reset") {
        let delta = reset_at - chrono::Utc::now().timestamp();
        return Some(Duration::from_secs(delta.max(0) as u64));
    }
    header("retry-after").map(|secs| Duration::from_secs(secs.max(0) as u64))
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> ApiClientConfig {
    ApiClientConfig {
        base_url: base_url.to_string(),
        bearer_token: "test-token".to_string(),
        timeout_secs: 5,
        timeline_page_size: TIMELINE_PAGE_MAX,
        following_page_size: FOLLOWING_PAGE_MAX,
        lookup_batch_size: LOOKUP_BATCH_MAX,
        rate_limit: RetryPolicy::test(Duration::from_millis(100)),
        server_unavailable: RetryPolicy::test(Duration::from_millis(100)),
    }
}
