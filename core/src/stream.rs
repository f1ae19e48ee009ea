//! Live response bodies handed to the caller undrained.
//!
//! A `BodyStream` is finite and cannot be restarted. It stays bound to the
//! connection it came from; dropping it releases the connection. The session
//! takes no further part once the stream has been handed over.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};

use crate::error::ApiError;

/// Descriptive metadata for a stored binary field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub name: String,
    pub content_type: String,
    pub size: Option<u64>,
}

pub struct BodyStream {
    inner: BoxStream<'static, Result<Bytes, ApiError>>,
    content_type: Option<String>,
    info: Option<BlobInfo>,
}

impl BodyStream {
    pub fn new<S>(inner: S, content_type: Option<String>) -> Self
    where
        S: Stream<Item = Result<Bytes, ApiError>> + Send + 'static,
    {
        BodyStream {
            inner: inner.boxed(),
            content_type,
            info: None,
        }
    }

    /// A stream that yields `bytes` once, then ends.
    pub fn from_bytes(bytes: impl Into<Bytes>, content_type: Option<String>) -> Self {
        let bytes = bytes.into();
        let chunks = if bytes.is_empty() { Vec::new() } else { vec![Ok(bytes)] };
        Self::new(stream::iter(chunks), content_type)
    }

    /// Content type declared by the response, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn info(&self) -> Option<&BlobInfo> {
        self.info.as_ref()
    }

    pub fn with_info(mut self, info: BlobInfo) -> Self {
        self.info = Some(info);
        self
    }

    /// Drain the stream into a single buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes, ApiError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.inner.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("content_type", &self.content_type)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
