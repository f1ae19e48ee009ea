//! Error types for the object-storage broker.
//!
//! # Design
//! `Auth` carries a `retryable` flag because the execution loop is the only
//! place that decides whether an authentication failure is absorbed (token
//! expired, try again once) or handed to the caller. Every other non-2xx
//! response lands in `Request` with the raw status code and body.
//!
//! `ApiError` is `Clone`: a fatal login failure is delivered to every action
//! still queued on the session, so the same error value is fanned out. Source
//! errors that are not `Clone` themselves are held behind an `Arc`.

use std::sync::Arc;

use thiserror::Error;

/// Errors delivered to the caller of a broker operation.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Login was rejected, or the service answered 401/403 to a data call.
    #[error("authentication failed: {message}")]
    Auth { retryable: bool, message: String },

    /// The service returned a non-2xx status other than 401/403.
    #[error("bad status {status}: {body}")]
    Request { status: u16, body: String },

    /// The body claimed to be JSON but could not be parsed.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The request payload could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The underlying connection failed before a status was received.
    #[error("transport failure: {0}")]
    Transport(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// Local content for an attachment could not be read.
    #[error("i/o failure: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The session task is gone; no further actions can run.
    #[error("session closed")]
    Closed,

    /// A broker was constructed outside a tokio runtime, so its session
    /// task could not be started.
    #[error("no async runtime: {0}")]
    Runtime(String),
}

impl ApiError {
    pub(crate) fn auth(retryable: bool, message: impl Into<String>) -> Self {
        ApiError::Auth {
            retryable,
            message: message.into(),
        }
    }

    pub(crate) fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ApiError::Transport(Arc::new(err))
    }

    /// True for the one failure class the execution loop absorbs by
    /// re-authenticating and re-attempting the action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Auth { retryable: true, .. })
    }

    /// True when the held access token must be discarded.
    pub fn clears_token(&self) -> bool {
        matches!(self, ApiError::Auth { .. })
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_auth_is_retryable() {
        assert!(ApiError::auth(true, "expired").is_retryable());
        assert!(!ApiError::auth(false, "denied").is_retryable());
        assert!(!ApiError::Request { status: 500, body: String::new() }.is_retryable());
        assert!(!ApiError::Decode("x".into()).is_retryable());
    }

    #[test]
    fn both_auth_kinds_clear_the_token() {
        assert!(ApiError::auth(true, "expired").clears_token());
        assert!(ApiError::auth(false, "denied").clears_token());
        assert!(!ApiError::Request { status: 404, body: String::new() }.clears_token());
    }

    #[test]
    fn display_includes_status() {
        let err = ApiError::Request {
            status: 404,
            body: "missing".into(),
        };
        assert_eq!(err.to_string(), "bad status 404: missing");
    }
}
