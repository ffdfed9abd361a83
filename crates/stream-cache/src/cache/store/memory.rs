//! # Memory Store
//!
//! In-process stream store backed by a size-weighted Moka cache. Entries do
//! not survive the process and may be evicted when the capacity is reached.

use std::io;
use std::io::Cursor;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::key::StorageIdentifier;
use crate::cache::locks::IdentifierLocks;
use crate::cache::store::{CacheReader, StagingHandle, StagingSink, StreamStore};
use crate::cache::types::{EntryMetadata, SweepStats};
use crate::error::{CacheError, CacheResult};

/// Entry in the memory store
#[derive(Clone)]
struct MemoryEntry {
    data: Bytes,
    metadata: EntryMetadata,
}

/// Memory store implementation using Moka
pub struct MemoryStore {
    cache: MokaCache<StorageIdentifier, MemoryEntry>,
    max_size: u64,
    locks: IdentifierLocks,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_size", &self.max_size)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MemoryStore {
    /// Create a new memory store holding at most `max_size_bytes` of content
    pub fn new(max_size_bytes: u64) -> CacheResult<Self> {
        if max_size_bytes == 0 {
            return Err(CacheError::InvalidConfiguration(
                "memory store size must be greater than zero".to_string(),
            ));
        }

        let cache = MokaCache::builder()
            .weigher(|_k, v: &MemoryEntry| v.data.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .build();

        debug!(max_size = max_size_bytes, "Memory store created");

        Ok(Self {
            cache,
            max_size: max_size_bytes,
            locks: IdentifierLocks::new(),
        })
    }

    async fn live_entry(&self, id: &StorageIdentifier) -> Option<MemoryEntry> {
        let entry = self.cache.get(id).await?;
        if entry.metadata.is_expired() {
            debug!(id = %id, "Memory entry expired");
            self.reclaim_if_expired(id).await;
            return None;
        }
        Some(entry)
    }

    async fn reclaim_if_expired(&self, id: &StorageIdentifier) -> bool {
        let _guard = self.locks.lock(id).await;
        match self.cache.get(id).await {
            Some(entry) if entry.metadata.is_expired() => {
                self.cache.invalidate(id).await;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, id: &StorageIdentifier) -> CacheResult<Option<CacheReader>> {
        Ok(self
            .live_entry(id)
            .await
            .map(|entry| CacheReader::new(Cursor::new(entry.data), entry.metadata)))
    }

    async fn contains(&self, id: &StorageIdentifier) -> CacheResult<bool> {
        Ok(self.live_entry(id).await.is_some())
    }

    async fn create(
        &self,
        id: &StorageIdentifier,
        expires_at: Option<SystemTime>,
    ) -> CacheResult<StagingHandle> {
        Ok(StagingHandle::new(
            id.clone(),
            SystemTime::now(),
            expires_at,
            StagingSink::Memory(Vec::new()),
        ))
    }

    async fn commit(&self, handle: StagingHandle) -> CacheResult<EntryMetadata> {
        let (metadata, sink) = handle.into_parts();
        let StagingSink::Memory(data) = sink else {
            return Err(CacheError::storage(
                "committing entry",
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "staging handle was not created by a memory store",
                ),
            ));
        };
        let id = StorageIdentifier::parse(&metadata.identifier).ok_or_else(|| {
            CacheError::storage(
                "committing entry",
                io::Error::new(io::ErrorKind::InvalidInput, "malformed identifier"),
            )
        })?;

        if metadata.content_length > self.max_size {
            warn!(
                id = %id,
                size = metadata.content_length,
                max_size = self.max_size,
                "Entry too large for memory store"
            );
            return Err(CacheError::storage(
                "committing entry",
                io::Error::new(
                    io::ErrorKind::StorageFull,
                    format!(
                        "entry of {} bytes exceeds memory store capacity of {} bytes",
                        metadata.content_length, self.max_size
                    ),
                ),
            ));
        }

        let entry = MemoryEntry {
            data: Bytes::from(data),
            metadata: metadata.clone(),
        };
        {
            let _guard = self.locks.lock(&id).await;
            self.cache.insert(id.clone(), entry).await;
        }

        debug!(id = %id, size = metadata.content_length, "Committed cache entry to memory");
        Ok(metadata)
    }

    async fn abort(&self, _handle: StagingHandle) -> CacheResult<()> {
        Ok(())
    }

    async fn remove(&self, id: &StorageIdentifier) -> CacheResult<()> {
        let _guard = self.locks.lock(id).await;
        self.cache.invalidate(id).await;
        Ok(())
    }

    async fn sweep(&self) -> CacheResult<SweepStats> {
        let now = SystemTime::now();
        let mut stats = SweepStats::default();

        let expired: Vec<StorageIdentifier> = self
            .cache
            .iter()
            .inspect(|_| stats.scanned += 1)
            .filter(|(_, entry)| entry.metadata.is_expired_at(now))
            .map(|(id, _)| (*id).clone())
            .collect();

        for id in expired {
            if self.reclaim_if_expired(&id).await {
                stats.removed_entries += 1;
            }
        }
        self.cache.run_pending_tasks().await;

        debug!(
            scanned = stats.scanned,
            removed_entries = stats.removed_entries,
            "Swept memory store"
        );
        Ok(stats)
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}
