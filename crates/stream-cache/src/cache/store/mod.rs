//! # Stream Stores
//!
//! Physical persistence of entries addressed by [`StorageIdentifier`].
//! A store hands out staging handles for writes and publishes them
//! atomically on commit, so readers only ever observe complete entries.

use std::fmt::Debug;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

use crate::cache::key::StorageIdentifier;
use crate::cache::types::{EntryMetadata, SweepStats, unix_ms};
use crate::error::CacheResult;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;

pub mod file;
pub mod memory;

/// A store that can persist and stream back cache entries
#[async_trait]
pub trait StreamStore: Debug + Send + Sync {
    /// Short name of the backend, used in logs
    fn name(&self) -> &'static str;

    /// Open a committed, unexpired entry for reading.
    ///
    /// Returns `Ok(None)` when no such entry exists. Expired entries are
    /// treated as absent and reclaimed.
    async fn open(&self, id: &StorageIdentifier) -> CacheResult<Option<CacheReader>>;

    /// Check for a committed, unexpired entry without reading its content
    async fn contains(&self, id: &StorageIdentifier) -> CacheResult<bool>;

    /// Start a write for `id`. Nothing written to the handle is visible
    /// until it is committed.
    async fn create(
        &self,
        id: &StorageIdentifier,
        expires_at: Option<SystemTime>,
    ) -> CacheResult<StagingHandle>;

    /// Atomically publish a staged write, replacing any previous entry
    async fn commit(&self, handle: StagingHandle) -> CacheResult<EntryMetadata>;

    /// Discard a staged write
    async fn abort(&self, handle: StagingHandle) -> CacheResult<()>;

    /// Remove an entry. Removing a missing entry is not an error.
    async fn remove(&self, id: &StorageIdentifier) -> CacheResult<()>;

    /// Remove expired entries and orphaned staging data
    async fn sweep(&self) -> CacheResult<SweepStats>;

    /// Remove every committed entry
    async fn clear(&self) -> CacheResult<()>;
}

/// Backend specific write target of a [`StagingHandle`]
#[derive(Debug)]
pub(crate) enum StagingSink {
    File(file::FileSink),
    Memory(Vec<u8>),
}

/// A write in progress. Dropping a handle without committing it discards
/// the staged content.
#[derive(Debug)]
pub struct StagingHandle {
    identifier: StorageIdentifier,
    created_at_ms: u64,
    expires_at_ms: Option<u64>,
    bytes_written: u64,
    sink: StagingSink,
}

impl StagingHandle {
    pub(crate) fn new(
        identifier: StorageIdentifier,
        created_at: SystemTime,
        expires_at: Option<SystemTime>,
        sink: StagingSink,
    ) -> Self {
        Self {
            identifier,
            created_at_ms: unix_ms(created_at),
            expires_at_ms: expires_at.map(unix_ms),
            bytes_written: 0,
            sink,
        }
    }

    pub fn identifier(&self) -> &StorageIdentifier {
        &self.identifier
    }

    /// Number of content bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Metadata the entry will carry once committed
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            identifier: self.identifier.to_string(),
            content_length: self.bytes_written,
            created_at_ms: self.created_at_ms,
            expires_at_ms: self.expires_at_ms,
        }
    }

    pub(crate) fn into_parts(self) -> (EntryMetadata, StagingSink) {
        let metadata = self.metadata();
        (metadata, self.sink)
    }
}

impl AsyncWrite for StagingHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = match &mut this.sink {
            StagingSink::File(sink) => Pin::new(&mut sink.writer).poll_write(cx, buf),
            StagingSink::Memory(data) => Pin::new(data).poll_write(cx, buf),
        };
        if let Poll::Ready(Ok(n)) = &poll {
            this.bytes_written += *n as u64;
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().sink {
            StagingSink::File(sink) => Pin::new(&mut sink.writer).poll_flush(cx),
            StagingSink::Memory(_) => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().sink {
            StagingSink::File(sink) => Pin::new(&mut sink.writer).poll_shutdown(cx),
            StagingSink::Memory(_) => Poll::Ready(Ok(())),
        }
    }
}

/// Readable stream over a committed entry
pub struct CacheReader {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    metadata: EntryMetadata,
}

impl CacheReader {
    pub fn new(inner: impl AsyncRead + Send + 'static, metadata: EntryMetadata) -> Self {
        Self {
            inner: Box::pin(inner),
            metadata,
        }
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    /// Read the whole entry into memory
    pub async fn into_bytes(mut self) -> io::Result<Bytes> {
        let capacity = usize::try_from(self.metadata.content_length).unwrap_or(0);
        let mut buf = Vec::with_capacity(capacity);
        self.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl Debug for CacheReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheReader")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for CacheReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}
