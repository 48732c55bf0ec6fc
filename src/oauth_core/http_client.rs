use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::error::AuthError;

/// Upper bound on a provider response body.
const DEFAULT_MAX_BODY_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    GET,
    POST,
}

/// HTTP request for executing a call.
#[derive(Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        HttpRequest { method: HttpMethod::GET, url: url.into(), headers: Vec::new(), body: None, timeout: None }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        HttpRequest { method: HttpMethod::POST, url: url.into(), headers: Vec::new(), body: Some(body), timeout: None }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

// Bodies and credentials headers carry client secrets, codes and tokens.
impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case("authorization") {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// HTTP response from executing a call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse { status, headers: Vec::new(), body: body.into() }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        HttpResponse {
            status,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("no mock response for {0}")]
    Unmatched(String),
}

impl HttpClientError {
    /// Lift into the crate error; `limit` is the bound the caller was enforcing.
    pub(crate) fn into_auth_error(self, limit: Duration) -> AuthError {
        match self {
            HttpClientError::Timeout => AuthError::Timeout(limit),
            other => AuthError::Transport(other.to_string()),
        }
    }
}

/// Outbound HTTP seam used for the token, userinfo, JWKS and discovery calls.
#[async_trait]
pub trait OAuthHttpClient: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError>;
}

/// Run `request` under `limit`, whatever the client's own timeout handling.
///
/// Dropping the returned future (client disconnect) drops the in-flight call.
pub(crate) async fn execute_bounded(
    client: &dyn OAuthHttpClient,
    request: HttpRequest,
    limit: Duration,
) -> Result<HttpResponse, AuthError> {
    match tokio::time::timeout(limit, client.execute(request.timeout(limit))).await {
        Ok(result) => result.map_err(|e| e.into_auth_error(limit)),
        Err(_) => Err(AuthError::Timeout(limit)),
    }
}

/// Production client on `reqwest`. Redirects are never followed.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
    max_body_size: usize,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self, AuthError> {
        Self::with_max_body_size(DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(max_body_size: usize) -> Result<Self, AuthError> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("pseudoidc_oauth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AuthError::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(ReqwestHttpClient { inner, max_body_size })
    }
}

fn transport(err: reqwest::Error) -> HttpClientError {
    if err.is_timeout() {
        HttpClientError::Timeout
    } else {
        HttpClientError::Transport(err.to_string())
    }
}

#[async_trait]
impl OAuthHttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let method = match request.method {
            HttpMethod::GET => reqwest::Method::GET,
            HttpMethod::POST => reqwest::Method::POST,
        };
        let mut builder = self.inner.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        if response.content_length().is_some_and(|len| len as usize > self.max_body_size) {
            return Err(HttpClientError::BodyTooLarge(self.max_body_size));
        }
        let body = response.bytes().await.map_err(transport)?;
        if body.len() > self.max_body_size {
            return Err(HttpClientError::BodyTooLarge(self.max_body_size));
        }
        Ok(HttpResponse { status, headers, body: body.to_vec() })
    }
}

/// In-memory HTTP client stub for testing.
///
/// Responses are matched on the URL without its query string. Every request is recorded.
#[derive(Clone, Default)]
pub struct InMemoryHttpClient {
    responses: Arc<DashMap<String, HttpResponse>>,
    default_response: Option<HttpResponse>,
    latency: Option<Duration>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl InMemoryHttpClient {
    /// Creates a new in-memory HTTP client with no default response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory HTTP client with a default response on miss.
    pub fn with_default(response: HttpResponse) -> Self {
        Self { default_response: Some(response), ..Self::default() }
    }

    /// Delay every response, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register a mock response for a specific URL.
    pub fn insert_response(&self, url: impl Into<String>, response: HttpResponse) {
        self.responses.insert(url.into(), response);
    }

    /// Every request executed so far, oldest first.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of requests sent to `url` (query string ignored).
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| strip_query(&r.url) == url).count()
    }
}

fn strip_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

#[async_trait]
impl OAuthHttpClient for InMemoryHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        let key = strip_query(&request.url).to_string();
        if let Ok(mut log) = self.requests.lock() {
            log.push(request);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(entry) = self.responses.get(&key) {
            Ok(entry.value().clone())
        } else if let Some(resp) = self.default_response.clone() {
            Ok(resp)
        } else {
            Err(HttpClientError::Unmatched(key))
        }
    }
}
