//! Response body types supporting buffered, streaming, and empty modes.
//!
//! - **Buffered**: small responses such as JSON payloads and status phrases.
//! - **Streaming**: object bytes relayed from a store as they are produced.
//! - **Empty**: HEAD responses, redirects, and other body-less replies.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use blobgate_core::BlobStream;
use bytes::Bytes;
use futures::Stream;
use http_body::Frame;
use http_body_util::Full;

/// Gateway response body.
///
/// Implements [`http_body::Body`] so it can be used directly with hyper
/// responses. Dropping a streaming body releases the underlying store stream.
#[derive(Debug, Default)]
pub enum ResponseBody {
    /// Buffered body for small responses.
    Buffered(Full<Bytes>),
    /// Object bytes streamed from a store.
    Streaming(BlobStream),
    /// Empty body.
    #[default]
    Empty,
}

impl ResponseBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Create a body that relays a store stream.
    #[must_use]
    pub fn streaming(stream: BlobStream) -> Self {
        Self::Streaming(stream)
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }
}

impl http_body::Body for ResponseBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Streaming(stream) => {
                let next = ready!(Pin::new(stream).poll_next(cx));
                Poll::Ready(next.map(|chunk| chunk.map(Frame::data)))
            }
            Self::Empty => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Streaming(_) => false,
            Self::Empty => true,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Streaming(stream) => stream
                .size()
                .map_or_else(http_body::SizeHint::default, http_body::SizeHint::with_exact),
            Self::Empty => http_body::SizeHint::with_exact(0),
        }
    }
}
