//! In-process byte pipe connecting a producer task to a consumer task.
//!
//! A [`pipe`] is a channel of tagged frames (`Data`, `Error`, `Eof`). The
//! channel holds at most one frame, and [`PipeWriter::write`] does not resolve
//! until the reader has taken the chunk, so a fast producer is paced by the
//! consumer and memory use stays bounded to one chunk regardless of object
//! size.
//!
//! Failures cross the pipe in both directions:
//!
//! - [`PipeWriter::close_with_error`] makes the reader's next poll fail with
//!   the given error.
//! - [`PipeReader::close_with_error`] records the cause out-of-band and closes
//!   the channel, so the writer's next write fails with it.
//! - Dropping the writer without closing surfaces as
//!   [`io::ErrorKind::UnexpectedEof`] on the reader; dropping the reader
//!   surfaces as [`PipeError::Closed`] on the writer.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::trace;

use crate::error::PipeError;
use crate::types::TransferContext;

/// One unit carried across a pipe.
#[derive(Debug)]
enum Frame {
    Data(Bytes),
    Error(io::Error),
    Eof,
}

/// State shared by both halves outside of the data channel.
#[derive(Debug, Default)]
struct Shared {
    reader_error: Mutex<Option<String>>,
}

/// Create a connected writer/reader pair.
#[must_use]
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(1);
    let shared = Arc::new(Shared::default());
    (
        PipeWriter {
            tx,
            shared: Arc::clone(&shared),
        },
        PipeReader {
            rx,
            shared,
            done: false,
        },
    )
}

/// The write half of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Frame>,
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Hand a chunk to the reader, resolving once the reader has taken it.
    ///
    /// Empty chunks are skipped.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), PipeError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Frame::Data(chunk))
            .await
            .map_err(|_| self.closed_error())?;
        // The single slot frees up only once the reader has received the chunk.
        self.tx
            .reserve()
            .await
            .map(drop)
            .map_err(|_| self.closed_error())
    }

    /// Signal end of stream to the reader.
    pub async fn close(self) -> Result<(), PipeError> {
        self.tx
            .send(Frame::Eof)
            .await
            .map_err(|_| self.closed_error())
    }

    /// Close the pipe so the reader's next poll fails with `err`.
    pub async fn close_with_error(self, err: io::Error) {
        if self.tx.send(Frame::Error(err)).await.is_err() {
            trace!("pipe reader already gone; dropping error");
        }
    }

    /// Whether the reader has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn closed_error(&self) -> PipeError {
        match self.shared.reader_error.lock().clone() {
            Some(msg) => PipeError::Peer(msg),
            None => PipeError::Closed,
        }
    }
}

/// The read half of a [`pipe`], consumed as a stream of byte chunks.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
    done: bool,
}

impl PipeReader {
    /// Close the pipe so the writer's next write fails with `cause`.
    pub fn close_with_error(mut self, cause: impl std::fmt::Display) {
        *self.shared.reader_error.lock() = Some(cause.to_string());
        self.rx.close();
    }

    /// Adapt this reader into an [`AsyncRead`](tokio::io::AsyncRead).
    #[must_use]
    pub fn into_async_read(self) -> StreamReader<Self, Bytes> {
        StreamReader::new(self)
    }

    fn finish(&mut self) {
        self.done = true;
        self.rx.close();
    }
}

impl Stream for PipeReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match ready!(this.rx.poll_recv(cx)) {
            Some(Frame::Data(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Frame::Error(err)) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Some(Frame::Eof) => {
                this.finish();
                Poll::Ready(None)
            }
            None => {
                this.finish();
                Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "pipe writer dropped before closing",
                ))))
            }
        }
    }
}

/// Drive `source` into `writer` until the source ends, fails, or the
/// transfer is cancelled. Returns the number of bytes handed to the reader.
///
/// Every exit path closes the pipe: cleanly on end of source, with the
/// source's error on failure, and with [`PipeError::Cancelled`] on
/// cancellation.
pub async fn pump<S, E>(ctx: &TransferContext, source: S, mut writer: PipeWriter) -> io::Result<u64>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut source = std::pin::pin!(source);
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = ctx.cancelled() => None,
            next = source.next() => Some(next),
        };
        let chunk = match next {
            None => return cancel(writer).await,
            Some(None) => {
                writer.close().await.map_err(io::Error::from)?;
                trace!(request_id = ctx.request_id(), written, "pipe source exhausted");
                return Ok(written);
            }
            Some(Some(Err(err))) => {
                let err = io::Error::other(err);
                writer
                    .close_with_error(io::Error::new(err.kind(), err.to_string()))
                    .await;
                return Err(err);
            }
            Some(Some(Ok(chunk))) => chunk,
        };

        let len = chunk.len() as u64;
        let sent = tokio::select! {
            biased;
            () = ctx.cancelled() => None,
            res = writer.write(chunk) => Some(res),
        };
        match sent {
            None => return cancel(writer).await,
            Some(Err(err)) => return Err(err.into()),
            Some(Ok(())) => written += len,
        }
    }
}

async fn cancel(writer: PipeWriter) -> io::Result<u64> {
    writer.close_with_error(PipeError::Cancelled.into()).await;
    Err(PipeError::Cancelled.into())
}
