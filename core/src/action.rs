//! Queued units of work and the futures callers await on them.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ApiError;
use crate::http::{BodyMode, HttpMethod};
use crate::response::{Body, Outcome};
use crate::stream::BodyStream;

enum Responder {
    Buffered(oneshot::Sender<Result<Body, ApiError>>),
    Streamed(oneshot::Sender<Result<BodyStream, ApiError>>),
}

/// One remote operation waiting in a session queue.
///
/// The completion channel fires exactly once; a retry re-inserts the same
/// `Action` rather than building a new one.
pub struct Action {
    pub method: HttpMethod,
    /// Request target: path plus query string.
    pub command: String,
    pub payload: Option<Bytes>,
    pub(crate) auth_retries: u8,
    responder: Responder,
}

impl Action {
    pub fn buffered(method: HttpMethod, command: String, payload: Option<Bytes>) -> (Self, Reply<Body>) {
        let (tx, rx) = oneshot::channel();
        let action = Action {
            method,
            command,
            payload,
            auth_retries: 0,
            responder: Responder::Buffered(tx),
        };
        (action, Reply { rx })
    }

    pub fn streamed(method: HttpMethod, command: String) -> (Self, Reply<BodyStream>) {
        let (tx, rx) = oneshot::channel();
        let action = Action {
            method,
            command,
            payload: None,
            auth_retries: 0,
            responder: Responder::Streamed(tx),
        };
        (action, Reply { rx })
    }

    pub fn mode(&self) -> BodyMode {
        match self.responder {
            Responder::Buffered(_) => BodyMode::Buffered,
            Responder::Streamed(_) => BodyMode::Streamed,
        }
    }

    /// Deliver the terminal result to whoever submitted this action.
    pub(crate) fn complete(self, result: Result<Outcome, ApiError>) {
        let command = self.command;
        let delivered = match self.responder {
            Responder::Buffered(tx) => tx.send(result.and_then(into_body)).is_ok(),
            Responder::Streamed(tx) => tx.send(result.map(into_stream)).is_ok(),
        };
        if !delivered {
            debug!(%command, "caller dropped its reply before completion");
        }
    }
}

fn into_body(outcome: Outcome) -> Result<Body, ApiError> {
    match outcome {
        Outcome::Body(body) => Ok(body),
        Outcome::Stream(_) => Err(ApiError::Decode("expected a buffered body, got a stream".into())),
    }
}

fn into_stream(outcome: Outcome) -> BodyStream {
    match outcome {
        Outcome::Stream(stream) => stream,
        Outcome::Body(Body::Json(value)) => {
            BodyStream::from_bytes(value.to_string(), Some("application/json".to_string()))
        }
        Outcome::Body(Body::Raw { content_type, content }) => BodyStream::from_bytes(content, content_type),
    }
}

/// Resolves with the outcome of one submitted action.
///
/// Dropping a `Reply` does not cancel the action; it still runs in order.
#[must_use = "a Reply does nothing unless awaited"]
pub struct Reply<T> {
    rx: oneshot::Receiver<Result<T, ApiError>>,
}

impl<T> Reply<T> {
    /// A reply that is already resolved, for requests rejected before queueing.
    pub(crate) fn ready(result: Result<T, ApiError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Reply { rx }
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ApiError::Closed)))
    }
}
