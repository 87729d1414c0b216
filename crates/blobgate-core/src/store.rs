//! Store capabilities the HTTP pipelines stream through.
//!
//! A store is anything that can accept a byte stream and hand back an
//! identifier ([`Uploader`]), and turn an identifier back into a byte stream
//! ([`Downloader`]). The identifier type is chosen by the store; the HTTP
//! layer only needs to display it and parse it back from a path segment.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio_util::sync::DropGuard;

use crate::error::StoreError;
use crate::types::TransferContext;

/// A boxed stream of byte chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded<Id> {
    /// Identifier the object was stored under.
    pub id: Id,
    /// Number of bytes consumed from the source stream.
    pub size: u64,
}

/// Accepts a byte stream and persists it under a fresh identifier.
#[async_trait]
pub trait Uploader: Send + Sync + 'static {
    /// Identifier assigned to stored objects.
    type Id: fmt::Display + Send;

    /// Consume `body` to its end and store it.
    ///
    /// A failure of `body` itself is reported as [`StoreError::Source`].
    /// Cancellation of `ctx` aborts the upload with [`StoreError::Cancelled`].
    async fn upload(
        &self,
        ctx: &TransferContext,
        body: ByteStream,
    ) -> Result<Uploaded<Self::Id>, StoreError>;
}

/// Produces the bytes of a stored object.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// Identifier of stored objects.
    type Id: FromStr + Send + Sync;

    /// Open the object stored under `id`.
    ///
    /// Returns [`StoreError::NotFound`] when nothing is stored under `id`.
    /// The returned stream stops producing once `ctx` is cancelled or the
    /// stream is released.
    async fn download(&self, ctx: &TransferContext, id: &Self::Id)
    -> Result<BlobStream, StoreError>;
}

/// The readable side of a download.
///
/// Dropping or [`release`](Self::release)-ing the stream cancels whatever is
/// still producing it.
pub struct BlobStream {
    stream: ByteStream,
    size: Option<u64>,
    guard: Option<DropGuard>,
}

impl BlobStream {
    /// Wrap a stream of chunks with an optional known total size.
    #[must_use]
    pub fn new(stream: ByteStream, size: Option<u64>) -> Self {
        Self {
            stream,
            size,
            guard: None,
        }
    }

    /// Cancel `guard`'s token once this stream is released or dropped.
    #[must_use]
    pub fn with_guard(mut self, guard: DropGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Total size of the object, when the store knows it up front.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Stop the producer without reading the remaining bytes.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream")
            .field("size", &self.size)
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl Stream for BlobStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}
