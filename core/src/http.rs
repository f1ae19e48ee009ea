//! HTTP transport types for the host-does-IO boundary.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The
//! authenticator and the execution loop build `HttpRequest` values and
//! classify `HttpResponse` values without touching the network; a
//! [`Transport`](crate::transport::Transport) executes the actual I/O. This
//! keeps header composition and status classification deterministic and easy
//! to test with vectors.
//!
//! Response bodies come in two shapes. A buffered body has been read to the
//! end by the transport. A streamed body is still attached to the connection
//! and is handed to the caller undrained.

use bytes::Bytes;

use crate::stream::BodyStream;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// An HTTP request described as plain data.
///
/// `host` is an authority (`name` or `name:port`); the transport picks the
/// scheme. `path` includes the query string.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub host: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// A data API call carrying `Authorization: OAuth <token>`.
    ///
    /// A payload adds `Content-Length` and `Expect: 100-continue`.
    pub fn api(method: HttpMethod, host: &str, path: &str, token: &str, payload: Option<Bytes>) -> Self {
        let mut headers = vec![
            ("Authorization".to_string(), format!("OAuth {token}")),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        if let Some(body) = &payload {
            headers.push(("Content-Length".to_string(), body.len().to_string()));
            headers.push(("Expect".to_string(), "100-continue".to_string()));
        }
        HttpRequest {
            method,
            host: host.to_string(),
            path: path.to_string(),
            headers,
            body: payload,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Whether the transport should read the body or leave it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Buffered,
    Streamed,
}

#[derive(Debug)]
pub enum ResponseBody {
    Buffered(Bytes),
    Streamed(BodyStream),
}

/// An HTTP response described as plain data.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ResponseBody,
}

impl HttpResponse {
    /// A fully-read response, as produced by tests and by buffered transport calls.
    pub fn buffered(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status,
            content_type: content_type.map(str::to_string),
            body: ResponseBody::Buffered(body.into()),
        }
    }
}
