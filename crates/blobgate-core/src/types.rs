//! Common type definitions shared across the gateway.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
use uuid::Uuid;

use crate::BlobGateError;

/// Prefix under which all blobs are laid out in a store.
const OBJECT_KEY_PREFIX: &str = "_blob";

/// Opaque identifier of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Storage key for this object: `_blob/<2 hex>/<2 hex>/<remaining 28 hex>`.
    ///
    /// Fanning out on the leading hex digits keeps any single directory or
    /// prefix listing small.
    #[must_use]
    pub fn object_key(&self) -> String {
        let hex = self.0.simple().to_string();
        format!(
            "{OBJECT_KEY_PREFIX}/{}/{}/{}",
            &hex[..2],
            &hex[2..4],
            &hex[4..]
        )
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for ObjectId {
    type Err = BlobGateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| BlobGateError::InvalidObjectId(s.to_owned()))
    }
}

/// Per-request context threaded through a transfer.
///
/// Carries the request id for log correlation and a cancellation token. The
/// HTTP layer cancels the token when the client goes away; producers and
/// stores observe it and stop promptly.
#[derive(Debug, Clone)]
pub struct TransferContext {
    request_id: Arc<str>,
    cancel: CancellationToken,
}

impl TransferContext {
    /// Create a context for the given request id.
    #[must_use]
    pub fn new(request_id: impl Into<Arc<str>>) -> Self {
        Self {
            request_id: request_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// The request id this transfer belongs to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// A context sharing the request id whose token is cancelled together
    /// with this one, but can also be cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            request_id: Arc::clone(&self.request_id),
            cancel: self.cancel.child_token(),
        }
    }

    /// Cancel the transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the transfer has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the transfer is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// A guard that cancels the transfer when dropped.
    #[must_use]
    pub fn drop_guard(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferResult {
    /// Identifier of the stored object, in display form.
    #[serde(rename = "resourceId")]
    pub id: String,
    /// Number of bytes written to the store.
    #[serde(rename = "bytesWritten")]
    pub bytes_transferred: u64,
    /// Wall-clock time from request start to completion.
    #[serde(rename = "timeElapsed", serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
}

impl TransferResult {
    /// Build a result from any displayable identifier.
    #[must_use]
    pub fn new(id: &impl fmt::Display, bytes_transferred: u64, elapsed: Duration) -> Self {
        Self {
            id: id.to_string(),
            bytes_transferred,
            elapsed,
        }
    }
}

fn serialize_elapsed<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{elapsed:?}"))
}
