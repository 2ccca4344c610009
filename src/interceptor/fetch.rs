//! The fetch abstraction the interceptor wraps.
//!
//! [`FetchSlot`] plays the role of the page's global `fetch` binding: host code
//! always calls through the slot, and the interceptor swaps a wrapping
//! implementation into it.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::pin::Pin;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Chunked response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, FetchError>> + Send>>;

/// An outgoing request as seen by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into().to_ascii_uppercase(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self::new("POST", url)
            .with_header("content-type", "application/json")
            .with_body(body.to_string().into_bytes())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Parses the body as a JSON object; anything else yields `None`.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        let body = self.body.as_deref()?;
        let text = String::from_utf8_lossy(body);
        if !text.trim_start().starts_with('{') {
            return None;
        }
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("⚠️ Error parsing request body: {}", e);
                None
            }
        }
    }
}

/// Response body: fully buffered, or a stream of chunks.
pub enum ResponseBody {
    Full(Vec<u8>),
    Stream(BodyStream),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Full(body.into()),
        }
    }

    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    pub fn streaming(status: u16, stream: BodyStream) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Stream(stream),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_event_stream(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false)
    }

    /// Consumes the response and collects the whole body.
    pub async fn bytes(self) -> Result<Vec<u8>, FetchError> {
        match self.body {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                stream
                    .try_fold(Vec::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await
            }
        }
    }
}

/// Anything that can perform a fetch.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;

    /// The wrapped implementation when this fetch is an interception layer.
    fn original(&self) -> Option<Arc<dyn Fetch>> {
        None
    }

    fn is_intercepting(&self) -> bool {
        self.original().is_some()
    }
}

/// The page's swappable fetch binding.
#[derive(Clone)]
pub struct FetchSlot {
    current: Arc<RwLock<Arc<dyn Fetch>>>,
}

impl FetchSlot {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self {
            current: Arc::new(RwLock::new(fetch)),
        }
    }

    pub fn current(&self) -> Arc<dyn Fetch> {
        self.current.read().clone()
    }

    /// Atomically replaces the binding when `f` returns a new one.
    pub fn replace_with<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Arc<dyn Fetch>) -> Option<Arc<dyn Fetch>>,
    {
        let mut guard = self.current.write();
        match f(&guard) {
            Some(next) => {
                *guard = next;
                true
            }
            None => false,
        }
    }

    /// Performs a fetch through whatever is currently installed.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let fetch = self.current();
        fetch.fetch(request).await
    }
}

/// Network fetch backed by reqwest.
#[derive(Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::error!("❌ HTTP request failed: {}", e);
            e
        })?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let is_stream = headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("content-type") && value.contains("text/event-stream")
        });

        let body = if is_stream {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(FetchError::from));
            ResponseBody::Stream(Box::pin(stream))
        } else {
            ResponseBody::Full(response.bytes().await?.to_vec())
        };

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}
