//! Error types for the BlobGate core.

use std::io;

/// Errors raised while parsing BlobGate values.
#[derive(Debug, thiserror::Error)]
pub enum BlobGateError {
    /// Invalid object identifier format.
    #[error("invalid object id: {0} (must be a UUID)")]
    InvalidObjectId(String),
}

/// Errors raised on either half of a [`pipe`](crate::pipe::pipe).
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    /// The other half is gone without reporting a cause.
    #[error("read/write on closed pipe")]
    Closed,

    /// The other half closed the pipe with an error.
    #[error("pipe closed by peer: {0}")]
    Peer(String),

    /// The transfer was cancelled.
    #[error("transfer cancelled")]
    Cancelled,
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        let kind = match &err {
            PipeError::Closed => io::ErrorKind::BrokenPipe,
            PipeError::Peer(_) => io::ErrorKind::Other,
            PipeError::Cancelled => io::ErrorKind::Interrupted,
        };
        io::Error::new(kind, err)
    }
}

/// Errors returned by a store capability.
///
/// The HTTP layer never echoes these to clients; they are logged and rendered
/// as a masked response.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object is stored under the requested identifier.
    #[error("object not found: {id}")]
    NotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// The transfer was cancelled before it completed.
    #[error("transfer cancelled")]
    Cancelled,

    /// Reading the source stream failed.
    #[error("failed to read source stream: {0}")]
    Source(#[source] io::Error),

    /// Backend I/O failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other backend failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether this error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
