//! Byte-counting reader decorator.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

/// A shareable handle onto the running total of a [`CountingReader`].
///
/// The handle can be read from another task while the reader is in use.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    /// Bytes read so far.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::AcqRel);
    }
}

pin_project! {
    /// Wraps an [`AsyncRead`] and counts every byte successfully read through it.
    ///
    /// Reads are delegated unchanged; failed and pending reads do not move
    /// the count.
    #[derive(Debug)]
    pub struct CountingReader<R> {
        #[pin]
        inner: R,
        counter: ByteCounter,
    }
}

impl<R> CountingReader<R> {
    /// Wrap `inner` with a zeroed counter.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            counter: ByteCounter::default(),
        }
    }

    /// A handle that observes this reader's count.
    #[must_use]
    pub fn counter(&self) -> ByteCounter {
        self.counter.clone()
    }

    /// Bytes read so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.counter.get()
    }

    /// Unwrap the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let res = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &res {
            this.counter.add((buf.filled().len() - before) as u64);
        }
        res
    }
}
