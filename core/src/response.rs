//! Status classification and body decoding for data API responses.
//!
//! # Design
//! Classification is a pure function over [`HttpResponse`] so the retry
//! policy in the execution loop only ever sees three outcomes: a usable
//! [`Outcome`], a retryable `Auth` error, or a terminal error.
//!
//! | status      | result                                   |
//! |-------------|------------------------------------------|
//! | 401         | `Auth { retryable: true }`               |
//! | 403         | `Auth { retryable: false }`              |
//! | 204         | `{"errors": [], "success": true}`        |
//! | other > 299 | `Request { status }`                     |
//! | 2xx         | JSON, raw bytes, or the live stream      |

use bytes::Bytes;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::http::{HttpResponse, ResponseBody};
use crate::stream::BodyStream;

const JSON_CONTENT_TYPE: &str = "application/json";

/// A decoded, fully-buffered response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    /// Anything not declared as JSON, byte-for-byte.
    Raw {
        content_type: Option<String>,
        content: Bytes,
    },
}

impl Body {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Raw { .. } => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Body::Json(value) => Some(value),
            Body::Raw { .. } => None,
        }
    }
}

/// What a successful call hands back to the caller.
#[derive(Debug)]
pub enum Outcome {
    Body(Body),
    Stream(BodyStream),
}

/// The body synthesized for `204 No Content`.
pub fn no_content_body() -> Value {
    json!({ "errors": [], "success": true })
}

/// Classify `response` and decode its body.
pub fn classify(response: HttpResponse) -> Result<Outcome, ApiError> {
    let HttpResponse {
        status,
        content_type,
        body,
    } = response;

    match status {
        401 => return Err(ApiError::auth(true, "not authenticated")),
        403 => return Err(ApiError::auth(false, "access denied")),
        204 => {
            return Ok(match body {
                ResponseBody::Buffered(_) => Outcome::Body(Body::Json(no_content_body())),
                ResponseBody::Streamed(stream) => Outcome::Stream(stream),
            })
        }
        s if s > 299 => {
            let body = match body {
                ResponseBody::Buffered(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                ResponseBody::Streamed(_) => String::new(),
            };
            return Err(ApiError::Request { status, body });
        }
        _ => {}
    }

    match body {
        ResponseBody::Streamed(stream) => Ok(Outcome::Stream(stream)),
        ResponseBody::Buffered(bytes) => decode(content_type, bytes).map(Outcome::Body),
    }
}

fn decode(content_type: Option<String>, bytes: Bytes) -> Result<Body, ApiError> {
    if is_json(content_type.as_deref()) {
        let value = serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        return Ok(Body::Json(value));
    }
    Ok(Body::Raw {
        content_type,
        content: bytes,
    })
}

pub(crate) fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.starts_with(JSON_CONTENT_TYPE))
}
