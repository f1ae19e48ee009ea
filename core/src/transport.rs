//! The network boundary: one HTTP exchange per call.
//!
//! # Design
//! `Transport` is the only seam that performs I/O. The session hands it a
//! fully-built [`HttpRequest`] and classifies whatever comes back, so a
//! scripted transport in tests exercises exactly the same retry paths as the
//! real one. Connection failures surface as `ApiError::Transport`; HTTP
//! statuses are never turned into errors here.
//!
//! The request timeout bounds buffered exchanges only. A streamed body
//! belongs to the caller once the status line is in, so it lives as long as
//! the connection does.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};

use crate::config::BrokerConfig;
use crate::error::ApiError;
use crate::http::{BodyMode, HttpMethod, HttpRequest, HttpResponse, ResponseBody};
use crate::stream::BodyStream;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request`. With `BodyMode::Streamed` the body must be left
    /// unread and returned as a live stream.
    async fn send(&self, request: HttpRequest, mode: BodyMode) -> Result<HttpResponse, ApiError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpsTransport {
    client: Client,
    scheme: String,
    request_timeout: Option<Duration>,
}

impl HttpsTransport {
    pub fn new(config: &BrokerConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("sobject-broker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::transport)?;
        Ok(Self::with_client(client, &config.scheme).request_timeout(config.request_timeout))
    }

    /// Wrap a preconfigured client. No request timeout is applied until
    /// [`request_timeout`](Self::request_timeout) sets one.
    pub fn with_client(client: Client, scheme: &str) -> Self {
        HttpsTransport {
            client,
            scheme: scheme.to_string(),
            request_timeout: None,
        }
    }

    /// Cap buffered exchanges, body included, at `timeout`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn url(&self, request: &HttpRequest) -> String {
        format!("{}://{}{}", self.scheme, request.host, request.path)
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, ApiError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ApiError::Encode(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| ApiError::Encode(e.to_string()))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn send(&self, request: HttpRequest, mode: BodyMode) -> Result<HttpResponse, ApiError> {
        let url = self.url(&request);
        let mut builder = self
            .client
            .request(method(request.method), &url)
            .headers(header_map(&request.headers)?);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let (BodyMode::Buffered, Some(timeout)) = (mode, self.request_timeout) {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(ApiError::transport)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match mode {
            BodyMode::Streamed => {
                let chunks = response.bytes_stream().map_err(ApiError::transport);
                ResponseBody::Streamed(BodyStream::new(chunks, content_type.clone()))
            }
            BodyMode::Buffered => ResponseBody::Buffered(response.bytes().await.map_err(ApiError::transport)?),
        };

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
