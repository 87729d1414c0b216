//! In-memory object store with spill-over to temporary files.
//!
//! Objects up to [`InMemoryStore::max_memory_size`] bytes are kept as
//! [`Bytes`]. Larger uploads are streamed to a temporary file as soon as they
//! cross the threshold, so the whole body is never buffered. The file is
//! removed once the last handle to the object is dropped, including handles
//! held by in-flight downloads.
//!
//! Downloads read the object in parts of `part_size` bytes, strictly one part
//! after another, and hand each part across a pipe in chunks of `chunk_size`
//! bytes.

use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use blobgate_core::config::{
    DEFAULT_DOWNLOAD_PART_SIZE, DEFAULT_MAX_MEMORY_OBJECT_SIZE, DEFAULT_READ_CHUNK_SIZE,
};
use blobgate_core::{
    BlobGateConfig, BlobStream, ByteStream, CountingReader, Downloader, ObjectId, StoreError,
    TransferContext, Uploaded, Uploader, pipe, pump,
};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::{Stream, TryStreamExt, stream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// StoredData
// ---------------------------------------------------------------------------

/// A temporary file owned by a stored object. The file is removed on drop.
#[derive(Debug)]
struct TempBlob {
    path: PathBuf,
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => trace!(path = %self.path.display(), "removed temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temp file"),
        }
    }
}

/// Body of a stored object.
enum StoredData {
    /// Small objects kept entirely in memory.
    InMemory(Bytes),
    /// Large objects spilled to a temp file.
    OnDisk { file: TempBlob, size: u64 },
}

impl std::fmt::Debug for StoredData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory(data) => f
                .debug_struct("InMemory")
                .field("size", &data.len())
                .finish(),
            Self::OnDisk { file, size } => f
                .debug_struct("OnDisk")
                .field("path", &file.path)
                .field("size", size)
                .finish(),
        }
    }
}

impl StoredData {
    fn size(&self) -> u64 {
        match self {
            Self::InMemory(data) => data.len() as u64,
            Self::OnDisk { size, .. } => *size,
        }
    }

    fn is_on_disk(&self) -> bool {
        matches!(self, Self::OnDisk { .. })
    }

    /// Read `len` bytes starting at `offset`. The range must lie within the object.
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        match self {
            Self::InMemory(data) => {
                let start = usize::try_from(offset).map_err(io::Error::other)?;
                Ok(data.slice(start..start + len))
            }
            Self::OnDisk { file, .. } => {
                let mut f = tokio::fs::File::open(&file.path).await?;
                f.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                f.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

/// Reference store implementing [`Uploader`] and [`Downloader`].
///
/// Thread-safe: objects live in a [`DashMap`] keyed by
/// [`ObjectId::object_key`].
///
/// # Examples
///
/// ```
/// use blobgate_core::{Downloader, TransferContext, Uploader};
/// use blobgate_store::InMemoryStore;
/// use bytes::Bytes;
/// use futures::TryStreamExt;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStore::new(1024);
/// let ctx = TransferContext::new("doc");
/// let body = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from("hello"))]);
///
/// let uploaded = store.upload(&ctx, Box::pin(body)).await.unwrap();
/// assert_eq!(uploaded.size, 5);
///
/// let stream = store.download(&ctx, &uploaded.id).await.unwrap();
/// let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
/// assert_eq!(chunks.concat(), b"hello");
/// # });
/// ```
pub struct InMemoryStore {
    objects: DashMap<String, Arc<StoredData>>,
    max_memory_size: usize,
    part_size: usize,
    chunk_size: usize,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("objects_count", &self.objects.len())
            .field("max_memory_size", &self.max_memory_size)
            .field("part_size", &self.part_size)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_OBJECT_SIZE)
    }
}

impl InMemoryStore {
    /// Create a store with the given memory threshold and default part and
    /// chunk sizes.
    #[must_use]
    pub fn new(max_memory_size: usize) -> Self {
        debug!(max_memory_size, "creating InMemoryStore");
        Self {
            objects: DashMap::new(),
            max_memory_size,
            part_size: DEFAULT_DOWNLOAD_PART_SIZE,
            chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    /// Create a store sized from the gateway configuration.
    #[must_use]
    pub fn from_config(config: &BlobGateConfig) -> Self {
        Self::new(config.max_memory_object_size)
            .with_part_size(config.download_part_size)
            .with_chunk_size(config.read_chunk_size)
    }

    /// Set the size of one part read from the backing data during downloads.
    #[must_use]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Set the size of one chunk handed across a download pipe.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Memory threshold above which uploads are spilled to disk.
    #[must_use]
    pub fn max_memory_size(&self) -> usize {
        self.max_memory_size
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether an object is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(&id.object_key())
    }

    /// Remove the object stored under `id`. In-flight downloads of it finish
    /// normally. This is a no-op if nothing is stored under `id`.
    pub fn delete(&self, id: &ObjectId) {
        if self.objects.remove(&id.object_key()).is_some() {
            trace!(%id, "deleted object");
        }
    }

    /// Remove every object.
    pub fn reset(&self) {
        debug!("resetting all stored objects");
        self.objects.clear();
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Read `reader` to its end, in memory until the threshold is crossed and
    /// on disk afterwards.
    async fn ingest<R>(&self, reader: &mut R) -> Result<StoredData, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let capacity = self.chunk_size.min(self.max_memory_size.saturating_add(1));
        let mut buf = BytesMut::with_capacity(capacity);
        loop {
            if buf.len() == buf.capacity() {
                buf.reserve(self.chunk_size);
            }
            let n = reader.read_buf(&mut buf).await.map_err(StoreError::Source)?;
            if n == 0 {
                return Ok(StoredData::InMemory(buf.freeze()));
            }
            if buf.len() > self.max_memory_size {
                return self.spill_to_disk(buf.freeze(), reader).await;
            }
        }
    }

    /// Write `head` and the rest of `reader` to a temporary file.
    async fn spill_to_disk<R>(&self, head: Bytes, reader: &mut R) -> Result<StoredData, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let (file, path) = tempfile::NamedTempFile::new()?.keep().map_err(|e| {
            StoreError::Internal(anyhow::anyhow!("failed to keep temp file: {e}"))
        })?;
        // Owned from here on so every error path removes the file.
        let blob = TempBlob { path };
        let mut file = tokio::fs::File::from_std(file);

        file.write_all(&head).await?;
        let mut size = head.len() as u64;
        let mut chunk = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut chunk).await.map_err(StoreError::Source)?;
            if n == 0 {
                break;
            }
            file.write_all(&chunk[..n]).await?;
            size += n as u64;
        }
        file.flush().await?;

        trace!(path = %blob.path.display(), size, "spilled object to disk");
        Ok(StoredData::OnDisk { file: blob, size })
    }

    #[cfg(test)]
    fn spill_path(&self, id: &ObjectId) -> Option<PathBuf> {
        self.objects
            .get(&id.object_key())
            .and_then(|entry| match entry.value().as_ref() {
                StoredData::OnDisk { file, .. } => Some(file.path.clone()),
                StoredData::InMemory(_) => None,
            })
    }
}

#[async_trait]
impl Uploader for InMemoryStore {
    type Id = ObjectId;

    async fn upload(
        &self,
        ctx: &TransferContext,
        body: ByteStream,
    ) -> Result<Uploaded<ObjectId>, StoreError> {
        let id = ObjectId::new();
        let mut reader = CountingReader::new(StreamReader::new(body));

        let stored = tokio::select! {
            biased;
            () = ctx.cancelled() => {
                debug!(request_id = ctx.request_id(), %id, "upload cancelled");
                return Err(StoreError::Cancelled);
            }
            stored = self.ingest(&mut reader) => stored?,
        };

        let size = reader.count();
        let key = id.object_key();
        debug!(
            request_id = ctx.request_id(),
            %id,
            key = %key,
            size,
            on_disk = stored.is_on_disk(),
            "stored object"
        );
        self.objects.insert(key, Arc::new(stored));

        Ok(Uploaded { id, size })
    }
}

#[async_trait]
impl Downloader for InMemoryStore {
    type Id = ObjectId;

    async fn download(
        &self,
        ctx: &TransferContext,
        id: &ObjectId,
    ) -> Result<BlobStream, StoreError> {
        let data = self
            .objects
            .get(&id.object_key())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        let size = data.size();
        let producer = ctx.child();
        let guard = producer.drop_guard();
        let (writer, reader) = pipe();
        let parts = part_chunks(data, self.part_size, self.chunk_size);

        tokio::spawn(async move {
            match pump(&producer, parts, writer).await {
                Ok(bytes) => trace!(request_id = producer.request_id(), bytes, "download produced"),
                Err(e) => debug!(
                    request_id = producer.request_id(),
                    error = %e,
                    "download producer stopped"
                ),
            }
        });

        debug!(request_id = ctx.request_id(), %id, size, "opened object for download");
        Ok(BlobStream::new(Box::pin(reader), Some(size)).with_guard(guard))
    }
}

/// Stream the object part by part, splitting each part into chunks.
///
/// The next part is only fetched once every chunk of the current one has been
/// taken, so at most one part is in flight.
fn part_chunks(
    data: Arc<StoredData>,
    part_size: usize,
    chunk_size: usize,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let size = data.size();
    stream::try_unfold((data, 0u64), move |(data, offset)| async move {
        if offset >= size {
            return Ok::<_, io::Error>(None);
        }
        let len = usize::try_from(size - offset).map_or(part_size, |rest| rest.min(part_size));
        let part = data.read_range(offset, len).await?;
        trace!(offset, len, "fetched object part");
        Ok(Some((part, (data, offset + len as u64))))
    })
    .map_ok(move |part| {
        let chunks = split_chunks(part, chunk_size);
        stream::iter(chunks.into_iter().map(Ok::<_, io::Error>))
    })
    .try_flatten()
}

fn split_chunks(mut part: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(part.len().div_ceil(chunk_size));
    while !part.is_empty() {
        let n = chunk_size.min(part.len());
        chunks.push(part.split_to(n));
    }
    chunks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
