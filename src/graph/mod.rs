//! Upstream HTTP mediator
//!
//! Every resource-API call goes through [`GraphClient`]: it attaches the
//! delegated bearer, enforces the per-request deadline, retries transient
//! failures, and maps upstream errors into the gateway taxonomy.
//!
//! # Retry policy
//!
//! - 429 / 503: honour `Retry-After` (seconds, default 1) before retrying.
//! - ≥ 500 and request timeouts: full-jitter exponential backoff,
//!   `retry_base · 2^attempt · (1 + rand)`.
//! - At most `max_retry_attempts` attempts total, then `UPSTREAM_ERROR` (502).
//! - Any other ≥ 400 is surfaced immediately with the upstream's structured
//!   error fields when present.

pub mod paging;

use std::time::Duration;

use bytes::Bytes;
use rand::RngExt;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::{Error, Result};

/// Mediated HTTP client for the resource API.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    max_attempts: u32,
    retry_base: f64,
}

enum RequestBody {
    None,
    Json(Value),
    Raw(Vec<u8>),
}

/// One upstream request under construction.
pub struct GraphRequest<'a> {
    client: &'a GraphClient,
    method: Method,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: RequestBody,
}

impl GraphClient {
    /// Build a mediator from the process configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the underlying HTTP client cannot be
    /// constructed.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.upstream_base_url.trim_end_matches('/').to_string(),
            max_attempts: config.max_retry_attempts,
            retry_base: config.retry_base_seconds,
        })
    }

    /// Resource API base URL (no trailing slash).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start building a request against an absolute URL.
    #[must_use]
    pub fn request(&self, method: Method, url: impl Into<String>) -> GraphRequest<'_> {
        GraphRequest {
            client: self,
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::None,
        }
    }

    /// GET against a path relative to the base URL.
    #[must_use]
    pub fn get(&self, path: &str) -> GraphRequest<'_> {
        self.request(Method::GET, format!("{}{path}", self.base_url))
    }

    /// POST against a path relative to the base URL.
    #[must_use]
    pub fn post(&self, path: &str) -> GraphRequest<'_> {
        self.request(Method::POST, format!("{}{path}", self.base_url))
    }

    /// PATCH against a path relative to the base URL.
    #[must_use]
    pub fn patch(&self, path: &str) -> GraphRequest<'_> {
        self.request(Method::PATCH, format!("{}{path}", self.base_url))
    }

    /// PUT against a path relative to the base URL.
    #[must_use]
    pub fn put(&self, path: &str) -> GraphRequest<'_> {
        self.request(Method::PUT, format!("{}{path}", self.base_url))
    }

    /// DELETE against a path relative to the base URL.
    #[must_use]
    pub fn delete(&self, path: &str) -> GraphRequest<'_> {
        self.request(Method::DELETE, format!("{}{path}", self.base_url))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_base * f64::from(2u32.saturating_pow(attempt));
        let jitter: f64 = rand::rng().random_range(0.0..1.0);
        Duration::from_secs_f64(base * (1.0 + jitter))
    }

    async fn execute(&self, request: &GraphRequest<'_>, token: &str, accept: &str) -> Result<reqwest::Response> {
        for attempt in 0..self.max_attempts {
            let mut req = self
                .http
                .request(request.method.clone(), request.url.as_str())
                .bearer_auth(token)
                .header("Accept", accept);
            if !request.query.is_empty() {
                req = req.query(&request.query);
            }
            for (name, value) in &request.headers {
                req = req.header(name.as_str(), value.as_str());
            }
            req = match &request.body {
                RequestBody::None => req,
                RequestBody::Json(body) => req.json(body),
                RequestBody::Raw(bytes) => req
                    .header("Content-Type", "application/octet-stream")
                    .body(bytes.clone()),
            };

            let response = match req.send().await {
                Ok(response) => response,
                Err(e) => {
                    // Timeouts and connection resets count as transient
                    if attempt + 1 < self.max_attempts {
                        let delay = self.backoff(attempt);
                        debug!(url = %request.url, error = %e, delay_ms = delay.as_millis(), "Transient upstream failure, retrying");
                        sleep(delay).await;
                        continue;
                    }
                    return Err(Error::upstream(format!("upstream request failed: {e}")));
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
            {
                if attempt + 1 < self.max_attempts {
                    let delay = retry_after(&response);
                    debug!(url = %request.url, status = %status, delay_s = delay.as_secs(), "Upstream throttled, honouring Retry-After");
                    sleep(delay).await;
                    continue;
                }
            } else if status.is_server_error() {
                if attempt + 1 < self.max_attempts {
                    let delay = self.backoff(attempt);
                    debug!(url = %request.url, status = %status, delay_ms = delay.as_millis(), "Upstream 5xx, backing off");
                    sleep(delay).await;
                    continue;
                }
            } else if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                warn!(url = %request.url, status = %status, "Upstream rejected request");
                return Err(Error::upstream(upstream_error_message(status, &body)));
            } else {
                return Ok(response);
            }
        }

        Err(Error::upstream("upstream request failed after retries"))
    }
}

impl GraphRequest<'_> {
    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// Append several query parameters.
    #[must_use]
    pub fn query_pairs(mut self, pairs: Vec<(String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    /// Set a request header.
    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Attach a JSON body (`Content-Type: application/json`).
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Attach a raw body (`Content-Type: application/octet-stream`).
    #[must_use]
    pub fn raw_body(mut self, bytes: Vec<u8>) -> Self {
        self.body = RequestBody::Raw(bytes);
        self
    }

    /// Send the request and parse a JSON response. 204 yields `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] per the mediator retry policy.
    pub async fn send_json(self, token: &str) -> Result<Value> {
        let response = self.client.execute(&self, token, "application/json").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(json!({}));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::upstream(format!("upstream body read failed: {e}")))?;
        if bytes.is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::upstream(format!("invalid JSON from upstream: {e}")))
    }

    /// Send the request and return the raw response body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Upstream`] per the mediator retry policy.
    pub async fn send_bytes(self, token: &str) -> Result<Bytes> {
        let response = self.client.execute(&self, token, "*/*").await?;
        response
            .bytes()
            .await
            .map_err(|e| Error::upstream(format!("upstream body read failed: {e}")))
    }
}

/// Parse a `Retry-After` header in seconds; defaults to 1 second.
fn retry_after(response: &reqwest::Response) -> Duration {
    let secs = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1);
    Duration::from_secs(secs)
}

/// Build a caller-visible message from an upstream error body.
///
/// Prefers the structured `error.message` / `error_description` / `error`
/// fields; falls back to the raw body.
fn upstream_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        let structured = payload
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| payload.get("error_description").and_then(Value::as_str))
            .or_else(|| payload.get("error").and_then(Value::as_str));
        if let Some(message) = structured {
            return format!("Graph error ({status}): {message}");
        }
    }
    format!("Graph error ({status}): {body}")
}
