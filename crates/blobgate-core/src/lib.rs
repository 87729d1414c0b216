//! Core types, streaming primitives, and store capabilities for BlobGate.
//!
//! This crate provides the building blocks shared by the HTTP layer and the
//! storage backends:
//!
//! - **Pipe** ([`pipe`]): a rendezvous channel of tagged frames connecting a
//!   producer to a consumer, with errors signalled in both directions.
//! - **Counting reader** ([`count`]): an `AsyncRead` decorator that tracks the
//!   number of bytes read so far.
//! - **Store capabilities** ([`store`]): the [`Uploader`] and [`Downloader`]
//!   traits the HTTP pipelines stream through.
//! - **Types** ([`types`]): object identifiers, per-request transfer context,
//!   and the upload completion summary.
//! - **Configuration** ([`config`]): environment-driven gateway settings.

pub mod config;
pub mod count;
mod error;
pub mod pipe;
pub mod store;
pub mod types;

pub use config::BlobGateConfig;
pub use count::{ByteCounter, CountingReader};
pub use error::{BlobGateError, PipeError, StoreError};
pub use pipe::{PipeReader, PipeWriter, pipe, pump};
pub use store::{BlobStream, ByteStream, Downloader, Uploaded, Uploader};
pub use types::{ObjectId, TransferContext, TransferResult};
