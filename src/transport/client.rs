//! HTTP transport for the API cache control plane.

use async_trait::async_trait;
use reqwest::{header, Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::config::TransportConfig;
use crate::error::RemoteError;

use super::types::{
    ApiCache, ApiCacheEnvelope, CreateApiCacheInput, ErrorBody, UpdateApiCacheInput,
};
use super::{ApiCacheTransport, RemoteResult};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Fallback wait when a throttled response has no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Whether a request may be sent again after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Repeating the request cannot change the outcome.
    Safe,
    /// The request is sent once; a lost response must not cause a second create.
    Never,
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client.
    client: Client,
    /// Base URL that route segments are appended to.
    endpoint: Url,
    /// Bearer token, if any.
    token: Option<String>,
    /// Retries after the first attempt.
    max_retries: u32,
    /// Base delay between retries.
    retry_delay: Duration,
}

impl HttpTransport {
    /// Creates a transport with default timeout and retry settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created or the endpoint
    /// is not a base URL.
    pub fn new(endpoint: &str) -> RemoteResult<Self> {
        Self::build(endpoint, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created or the endpoint
    /// is not a base URL.
    pub fn from_config(config: &TransportConfig, token: Option<String>) -> RemoteResult<Self> {
        let mut transport = Self::build(&config.endpoint, config.timeout_secs)?
            .with_retry(config.max_retries, Duration::from_millis(config.retry_delay_ms));
        transport.token = token.filter(|t| !t.is_empty());
        Ok(transport)
    }

    fn build(endpoint: &str, timeout_secs: u64) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to create HTTP client: {e}")))?;

        let endpoint = Url::parse(endpoint)
            .map_err(|e| RemoteError::bad_request(format!("Invalid endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(RemoteError::bad_request(format!(
                "Invalid endpoint '{endpoint}': not a base URL"
            )));
        }

        Ok(Self {
            client,
            endpoint,
            token: None,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Builds `{endpoint}/v1/apis/{api_id}/{route..}`.
    ///
    /// The id is pushed as a single path segment, so `/`, `?` and `#` in it
    /// are percent-encoded rather than changing the route.
    fn cache_url(&self, api_id: &str, route: &[&str]) -> RemoteResult<Url> {
        let invalid = || RemoteError::bad_request(format!("Invalid endpoint '{}'", self.endpoint));
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| invalid())?
            .pop_if_empty()
            .extend(["v1", "apis", api_id])
            .extend(route);
        Ok(url)
    }

    /// Sends a request, retrying transient failures with linear backoff
    /// when `replay` allows it.
    async fn execute<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&B>,
        replay: Replay,
    ) -> RemoteResult<Option<String>> {
        let max_retries = match replay {
            Replay::Safe => self.max_retries,
            Replay::Never => 0,
        };
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {max_retries} for {method} {url}");
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.execute_once(method.clone(), url, body).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_retries => {
                    warn!("Transient error on {method} {url}: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends a single request and classifies the response.
    async fn execute_once<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&B>,
    ) -> RemoteResult<Option<String>> {
        trace!("{method} {url}");

        let mut request = self
            .client
            .request(method, url.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;
            return Ok(Some(text).filter(|t| !t.trim().is_empty()));
        }

        Err(classify(status, response, url.as_str()).await)
    }

    async fn execute_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &Url,
        body: Option<&B>,
        replay: Replay,
    ) -> RemoteResult<T> {
        let text = self
            .execute(method, url, body, replay)
            .await?
            .ok_or_else(|| RemoteError::InvalidResponse {
                message: String::from("Empty response body"),
            })?;

        serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }
}

/// Maps a non-success response to a [`RemoteError`].
///
/// Structured error codes win over the status code when present.
async fn classify(status: StatusCode, response: Response, url: &str) -> RemoteError {
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body.message.unwrap_or_else(|| {
        if text.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            text.clone()
        }
    });

    let code = body.code.as_deref().unwrap_or_default();
    let code = code.rsplit('#').next().unwrap_or(code);

    match code {
        "NotFoundException" => return RemoteError::not_found(url.to_string()),
        "LimitExceededException" => return RemoteError::QuotaExceeded { message },
        "ConcurrentModificationException" => return RemoteError::Conflict { message },
        "UnauthorizedException" | "AccessDeniedException" => {
            return RemoteError::AccessDenied { message };
        }
        _ => {}
    }

    match status.as_u16() {
        404 => RemoteError::not_found(url.to_string()),
        429 => RemoteError::Throttled {
            retry_after_secs: retry_after,
        },
        401 | 403 => RemoteError::AccessDenied { message },
        409 => RemoteError::Conflict { message },
        500..=599 => RemoteError::Unavailable {
            status: status.as_u16(),
            message,
        },
        _ => RemoteError::bad_request(message),
    }
}

#[async_trait]
impl ApiCacheTransport for HttpTransport {
    async fn create_api_cache(&self, input: CreateApiCacheInput) -> RemoteResult<ApiCache> {
        let url = self.cache_url(&input.api_id, &["ApiCaches"])?;
        let envelope: ApiCacheEnvelope = self
            .execute_json(Method::POST, &url, Some(&input), Replay::Never)
            .await?;
        Ok(envelope.api_cache)
    }

    async fn get_api_cache(&self, api_id: &str) -> RemoteResult<ApiCache> {
        let url = self.cache_url(api_id, &["ApiCache"])?;
        let envelope: ApiCacheEnvelope = self
            .execute_json::<(), _>(Method::GET, &url, None, Replay::Safe)
            .await?;
        Ok(envelope.api_cache)
    }

    async fn update_api_cache(&self, input: UpdateApiCacheInput) -> RemoteResult<ApiCache> {
        let url = self.cache_url(&input.api_id, &["ApiCache", "update"])?;
        let envelope: ApiCacheEnvelope = self
            .execute_json(Method::POST, &url, Some(&input), Replay::Safe)
            .await?;
        Ok(envelope.api_cache)
    }

    async fn delete_api_cache(&self, api_id: &str) -> RemoteResult<()> {
        let url = self.cache_url(api_id, &["ApiCache"])?;
        self.execute::<()>(Method::DELETE, &url, None, Replay::Safe).await?;
        Ok(())
    }
}
