//! Storage backends for BlobGate.
//!
//! [`InMemoryStore`] implements both store capabilities from
//! [`blobgate_core::store`]. Small objects live in memory; objects above a
//! configurable threshold are spilled to temporary files. Downloads are
//! produced part by part through a [`pipe`](blobgate_core::pipe), one part in
//! flight at a time.

pub mod memory;

pub use memory::InMemoryStore;
