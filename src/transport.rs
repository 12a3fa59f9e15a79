//! The seam between the request model and the backends.
//!
//! The submitters encode a [`Request`](crate::Request) into an [`Outgoing`]
//! request, hand it to a [`Transport`] and read the [`TransportResponse`] it
//! returns. Backends only need to turn an [`Outgoing`] into their native
//! request and stream the answer back as a [`ResponseBody`].

use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};
use std::{any::Any, io, path::PathBuf};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, TryStreamExt, io::AsyncRead, stream};
use http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use url::Url;

use crate::{Method, error::TransportFailure, param::ParamValue};

/// Future returned by [`Transport::execute`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportFailure>> + Send + 'a>>;

/// An HTTP engine able to execute encoded requests.
///
/// Implementations are shared by every clone of an [`Http`](crate::Http)
/// client and must be safe to call concurrently.
pub trait Transport: fmt::Debug + Send + Sync + 'static {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Send the request and return once the status line and headers arrived.
    fn execute(&self, request: Outgoing) -> TransportFuture<'_>;

    /// Release pooled resources. Called at most once per client.
    fn close(&self) {}
}

/// A request after the encoding policy was applied.
#[derive(Debug, Clone)]
pub struct Outgoing {
    /// Method to send
    pub method: Method,
    /// Full URL, including the query string built from parameters
    pub url: Url,
    /// Headers in the order they were configured; repeated names are repeated
    pub headers: Vec<(String, String)>,
    /// Entity for `POST`, `PUT` and `PATCH`, `None` otherwise
    pub entity: Option<Entity>,
}

impl Outgoing {
    /// Whether a header with this name (case-insensitive) was configured.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Content type the backend should add, unless the caller configured a
    /// `Content-Type` header.
    pub fn entity_content_type(&self) -> Option<&str> {
        if self.has_header(CONTENT_TYPE.as_str()) {
            return None;
        }
        self.entity.as_ref().and_then(Entity::content_type)
    }
}

/// Encoded request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// No content
    Empty {
        /// Content type, if any
        content_type: Option<String>,
    },
    /// In-memory content (explicit bytes or an encoded form)
    Bytes {
        /// Payload
        data: Bytes,
        /// Content type, if any
        content_type: Option<String>,
    },
    /// Contents of a local file
    File {
        /// File to send
        path: PathBuf,
        /// Content type, if any
        content_type: Option<String>,
    },
    /// `multipart/form-data`; binary values become binary parts, the rest text
    /// parts. The backend generates the boundary.
    Multipart {
        /// Parts in parameter order
        parts: Vec<(String, ParamValue)>,
    },
}

impl Entity {
    /// Content type of a non-multipart entity.
    pub fn content_type(&self) -> Option<&str> {
        match self {
            Self::Empty { content_type }
            | Self::Bytes { content_type, .. }
            | Self::File { content_type, .. } => content_type.as_deref(),
            Self::Multipart { .. } => None,
        }
    }
}

/// Status, headers and the still-open body returned by a backend.
#[derive(Debug)]
pub struct TransportResponse {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: ResponseBody,
}

/// A response body stream.
///
/// The body owns whatever the backend needs to keep alive while it is read
/// (pooled connection, connection permit, ...). All of it is released when the
/// body is closed or dropped.
pub struct ResponseBody {
    stream: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    guards: Vec<Box<dyn Any + Send>>,
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("guards", &self.guards.len())
            .finish_non_exhaustive()
    }
}

impl ResponseBody {
    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// A body backed by bytes already in memory.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::from_stream(stream::once(async move { Ok(bytes) }))
    }

    /// A body backed by a chunk stream.
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            guards: Vec::new(),
        }
    }

    /// Keep `guard` alive until the body is closed.
    #[must_use]
    pub fn with_guard(mut self, guard: impl Any + Send) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    /// Read the next chunk, `None` at the end of the body.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the backend.
    pub async fn chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.stream.next().await.transpose()
    }

    /// Read the rest of the body into memory.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the backend.
    pub async fn bytes(&mut self) -> io::Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Read the rest of the body as UTF-8 text, replacing invalid sequences.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the backend.
    pub async fn text(&mut self) -> io::Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Borrow the body as an [`AsyncRead`].
    pub fn reader(&mut self) -> impl AsyncRead + Unpin + '_ {
        TryStreamExt::into_async_read(self)
    }

    /// Close the body and release the resources it holds.
    pub fn close(self) {
        drop(self);
    }
}

impl Stream for ResponseBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}
