//! # File Store
//!
//! Persists each entry as one file under `<root>/entries/<shard>/<identifier>`.
//! The file starts with a small header (magic, header length, JSON metadata)
//! followed by the content. Writes go to `<root>/staging` and are published
//! with a rename over the final path, so a reader holding an open file keeps
//! seeing the entry it opened.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use crate::cache::key::StorageIdentifier;
use crate::cache::locks::IdentifierLocks;
use crate::cache::store::{CacheReader, StagingHandle, StagingSink, StreamStore};
use crate::cache::types::{EntryMetadata, SweepStats, unix_ms};
use crate::error::{CacheError, CacheResult, StorageContext};

const MAGIC: &[u8; 4] = b"SCE1";
const ENTRIES_DIR: &str = "entries";
const STAGING_DIR: &str = "staging";
const STAGING_EXTENSION: &str = "tmp";
/// Upper bound on the JSON header, anything larger is treated as corruption
const MAX_HEADER_LEN: u32 = 16 * 1024;

/// Header stored in front of the content of every entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryHeader {
    identifier: String,
    created_at_ms: u64,
    expires_at_ms: Option<u64>,
}

impl EntryHeader {
    fn encode(&self) -> io::Result<Vec<u8>> {
        let json = serde_json::to_vec(self).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize entry header: {e}"),
            )
        })?;
        let len = u32::try_from(json.len())
            .ok()
            .filter(|len| *len <= MAX_HEADER_LEN)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "entry header too large"))?;

        let mut buf = Vec::with_capacity(MAGIC.len() + 4 + json.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&json);
        Ok(buf)
    }

    /// Read the header from the start of `file`, returning it with its encoded length
    async fn decode(file: &mut File) -> io::Result<(Self, u64)> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).await.map_err(corrupt_on_eof)?;
        if &magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "entry file has an unknown format",
            ));
        }

        let len = file.read_u32().await.map_err(corrupt_on_eof)?;
        if len > MAX_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry header length {len} exceeds limit"),
            ));
        }

        let mut json = vec![0u8; len as usize];
        file.read_exact(&mut json).await.map_err(corrupt_on_eof)?;
        let header: EntryHeader = serde_json::from_slice(&json).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to parse entry header: {e}"),
            )
        })?;

        Ok((header, (MAGIC.len() + 4) as u64 + u64::from(len)))
    }
}

fn corrupt_on_eof(e: io::Error) -> io::Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        io::Error::new(io::ErrorKind::InvalidData, "entry file is truncated")
    } else {
        e
    }
}

/// Staging file of an uncommitted write. Removed on drop unless published.
#[derive(Debug)]
pub(crate) struct FileSink {
    pub(crate) writer: BufWriter<File>,
    path: PathBuf,
    armed: bool,
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = ?self.path, error = %e, "Failed to remove abandoned staging file");
                }
            }
        }
    }
}

/// File-backed stream store
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    entries_dir: PathBuf,
    staging_dir: PathBuf,
    stale_staging_after: Duration,
    locks: IdentifierLocks,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    ///
    /// Fails with [`CacheError::InvalidConfiguration`] when the directories
    /// cannot be created or written to. Orphaned staging files older than
    /// `stale_staging_after` are reclaimed.
    pub async fn new(root: impl Into<PathBuf>, stale_staging_after: Duration) -> CacheResult<Self> {
        let root = root.into();
        let store = Self {
            entries_dir: root.join(ENTRIES_DIR),
            staging_dir: root.join(STAGING_DIR),
            root,
            stale_staging_after,
            locks: IdentifierLocks::new(),
        };

        store.initialize().await.map_err(|e| {
            CacheError::InvalidConfiguration(format!(
                "cache root {} is not usable: {e}",
                store.root.display()
            ))
        })?;

        match store.reclaim_staging().await {
            Ok(0) => {}
            Ok(count) => debug!(root = ?store.root, count, "Reclaimed orphaned staging files"),
            Err(e) => warn!(root = ?store.root, error = %e, "Failed to reclaim staging files"),
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn initialize(&self) -> io::Result<()> {
        fs::create_dir_all(&self.entries_dir).await?;
        fs::create_dir_all(&self.staging_dir).await?;

        // Probe that the staging area accepts writes
        let probe = self
            .staging_dir
            .join(format!(".probe-{}", uuid::Uuid::new_v4()));
        fs::write(&probe, b"").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    /// Get the path of a committed entry
    fn entry_path(&self, id: &StorageIdentifier) -> PathBuf {
        self.entries_dir.join(id.shard()).join(id.as_str())
    }

    fn staging_path(&self, id: &StorageIdentifier) -> PathBuf {
        self.staging_dir.join(format!(
            "{id}.{}.{STAGING_EXTENSION}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Open the entry at `path` and read its metadata.
    ///
    /// Returns the file positioned at the start of the content.
    async fn open_entry(
        &self,
        id: &StorageIdentifier,
        path: &Path,
    ) -> CacheResult<Option<(File, EntryMetadata)>> {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::storage(format!("opening entry {id}"), e)),
        };

        let (header, header_len) = EntryHeader::decode(&mut file)
            .await
            .storage_context(|| format!("reading header of entry {id}"))?;
        if header.identifier != id.as_str() {
            return Err(CacheError::storage(
                format!("reading header of entry {id}"),
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("header belongs to entry {}", header.identifier),
                ),
            ));
        }

        let file_len = file
            .metadata()
            .await
            .storage_context(|| format!("reading size of entry {id}"))?
            .len();
        let content_length = file_len.checked_sub(header_len).ok_or_else(|| {
            CacheError::storage(
                format!("reading size of entry {id}"),
                io::Error::new(io::ErrorKind::InvalidData, "entry file is truncated"),
            )
        })?;

        let metadata = EntryMetadata {
            identifier: header.identifier,
            content_length,
            created_at_ms: header.created_at_ms,
            expires_at_ms: header.expires_at_ms,
        };
        Ok(Some((file, metadata)))
    }

    /// Remove the entry for `id` if it is still expired once the publish
    /// lock is held. Returns whether a file was removed.
    async fn reclaim_if_expired(&self, id: &StorageIdentifier) -> CacheResult<bool> {
        let _guard = self.locks.lock(id).await;
        let path = self.entry_path(id);

        // Re-check under the lock: a commit may have replaced the entry
        let expired = match self.open_entry(id, &path).await? {
            Some((_, metadata)) => metadata.is_expired(),
            None => false,
        };
        if !expired {
            return Ok(false);
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id = %id, "Reclaimed expired cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(format!("removing expired entry {id}"), e)),
        }
    }

    /// Remove staging files that have not been touched for `stale_staging_after`
    async fn reclaim_staging(&self) -> io::Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.staging_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STAGING_EXTENSION) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < self.stale_staging_after {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        Ok(removed)
    }

    /// List the identifiers of all committed entries
    async fn list_entries(&self) -> CacheResult<Vec<StorageIdentifier>> {
        let mut ids = Vec::new();
        let mut shards = fs::read_dir(&self.entries_dir)
            .await
            .storage_context(|| format!("listing {}", self.entries_dir.display()))?;

        while let Some(shard) = shards
            .next_entry()
            .await
            .storage_context(|| format!("listing {}", self.entries_dir.display()))?
        {
            let shard_path = shard.path();
            match shard.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                _ => continue,
            }

            let mut files = match fs::read_dir(&shard_path).await {
                Ok(files) => files,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(CacheError::storage(
                        format!("listing {}", shard_path.display()),
                        e,
                    ));
                }
            };
            while let Some(file) = files
                .next_entry()
                .await
                .storage_context(|| format!("listing {}", shard_path.display()))?
            {
                if let Some(id) = file.file_name().to_str().and_then(StorageIdentifier::parse) {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }
}

#[async_trait]
impl StreamStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open(&self, id: &StorageIdentifier) -> CacheResult<Option<CacheReader>> {
        let path = self.entry_path(id);
        let Some((file, metadata)) = self.open_entry(id, &path).await? else {
            return Ok(None);
        };

        if metadata.is_expired() {
            if let Err(e) = self.reclaim_if_expired(id).await {
                warn!(id = %id, error = %e, "Failed to reclaim expired cache entry");
            }
            return Ok(None);
        }

        let content = BufReader::new(file).take(metadata.content_length);
        Ok(Some(CacheReader::new(content, metadata)))
    }

    async fn contains(&self, id: &StorageIdentifier) -> CacheResult<bool> {
        let path = self.entry_path(id);
        Ok(self
            .open_entry(id, &path)
            .await?
            .is_some_and(|(_, metadata)| !metadata.is_expired()))
    }

    async fn create(
        &self,
        id: &StorageIdentifier,
        expires_at: Option<SystemTime>,
    ) -> CacheResult<StagingHandle> {
        let created_at = SystemTime::now();
        let header = EntryHeader {
            identifier: id.to_string(),
            created_at_ms: unix_ms(created_at),
            expires_at_ms: expires_at.map(unix_ms),
        }
        .encode()
        .storage_context(|| format!("encoding header of entry {id}"))?;

        fs::create_dir_all(&self.staging_dir)
            .await
            .storage_context(|| format!("creating {}", self.staging_dir.display()))?;

        let path = self.staging_path(id);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .storage_context(|| format!("creating staging file {}", path.display()))?;

        let mut sink = FileSink {
            writer: BufWriter::new(file),
            path,
            armed: true,
        };
        sink.writer
            .write_all(&header)
            .await
            .storage_context(|| format!("writing header to {}", sink.path.display()))?;

        Ok(StagingHandle::new(
            id.clone(),
            created_at,
            expires_at,
            StagingSink::File(sink),
        ))
    }

    async fn commit(&self, handle: StagingHandle) -> CacheResult<EntryMetadata> {
        let (metadata, sink) = handle.into_parts();
        let StagingSink::File(mut sink) = sink else {
            return Err(CacheError::storage(
                "committing entry",
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "staging handle was not created by a file store",
                ),
            ));
        };
        let id = StorageIdentifier::parse(&metadata.identifier).ok_or_else(|| {
            CacheError::storage(
                "committing entry",
                io::Error::new(io::ErrorKind::InvalidInput, "malformed identifier"),
            )
        })?;

        sink.writer
            .flush()
            .await
            .storage_context(|| format!("flushing {}", sink.path.display()))?;
        sink.writer
            .get_mut()
            .sync_all()
            .await
            .storage_context(|| format!("syncing {}", sink.path.display()))?;

        let final_path = self.entry_path(&id);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .storage_context(|| format!("creating {}", parent.display()))?;
        }

        {
            let _guard = self.locks.lock(&id).await;
            if let Err(e) = fs::rename(&sink.path, &final_path).await {
                warn!(
                    from = ?sink.path,
                    to = ?final_path,
                    error = %e,
                    "Failed to publish staged cache entry"
                );
                return Err(CacheError::storage(format!("publishing entry {id}"), e));
            }
            sink.armed = false;
        }

        debug!(id = %id, size = metadata.content_length, "Committed cache entry to file");
        Ok(metadata)
    }

    async fn abort(&self, handle: StagingHandle) -> CacheResult<()> {
        let (metadata, sink) = handle.into_parts();
        let StagingSink::File(mut sink) = sink else {
            return Ok(());
        };

        sink.armed = false;
        match fs::remove_file(&sink.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CacheError::storage(
                    format!("removing staging file {}", sink.path.display()),
                    e,
                ));
            }
        }

        debug!(id = %metadata.identifier, "Aborted staged cache entry");
        Ok(())
    }

    async fn remove(&self, id: &StorageIdentifier) -> CacheResult<()> {
        let path = self.entry_path(id);
        let _guard = self.locks.lock(id).await;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id = %id, "Removed cache entry");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to remove cache entry");
                Err(CacheError::storage(format!("removing entry {id}"), e))
            }
        }
    }

    async fn sweep(&self) -> CacheResult<SweepStats> {
        let mut stats = SweepStats::default();

        for id in self.list_entries().await? {
            stats.scanned += 1;

            let expired = match self.open_entry(&id, &self.entry_path(&id)).await {
                Ok(Some((_, metadata))) => metadata.is_expired(),
                Ok(None) => false,
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping unreadable cache entry during sweep");
                    false
                }
            };

            if expired && self.reclaim_if_expired(&id).await? {
                stats.removed_entries += 1;
            }
        }

        stats.removed_staging = self
            .reclaim_staging()
            .await
            .storage_context(|| format!("reclaiming {}", self.staging_dir.display()))?;

        debug!(
            scanned = stats.scanned,
            removed_entries = stats.removed_entries,
            removed_staging = stats.removed_staging,
            "Swept file cache"
        );
        Ok(stats)
    }

    async fn clear(&self) -> CacheResult<()> {
        let ids = self.list_entries().await?;
        let count = ids.len();
        for id in ids {
            self.remove(&id).await?;
        }

        debug!(count, "Cleared cache entries");
        Ok(())
    }
}
