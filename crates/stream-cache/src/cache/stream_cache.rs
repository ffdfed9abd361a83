//! # Stream Cache
//!
//! The public cache abstraction. Every operation derives a storage
//! identifier from the instance name and the logical key, then delegates to
//! the configured [`StreamStore`].
//!
//! Concurrent writers of the same key are not serialised: each write stages
//! its own copy and the last commit wins. Readers are never blocked by
//! writers and always observe a complete entry.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::factory::create_store;
use crate::cache::key::{CacheKey, StorageIdentifier};
use crate::cache::store::{CacheReader, StagingHandle, StreamStore};
use crate::cache::types::{CacheOptions, EntryMetadata, Expiry, SweepStats};
use crate::error::{CacheError, CacheResult, StorageContext};

/// Namespaced cache of byte streams
#[derive(Clone)]
pub struct StreamCache {
    store: Arc<dyn StreamStore>,
    options: Arc<CacheOptions>,
}

impl std::fmt::Debug for StreamCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCache")
            .field("backend", &self.store.name())
            .field("instance_name", &self.options.instance_name)
            .finish()
    }
}

impl StreamCache {
    /// Create a cache with the backend named by `options.configuration`.
    ///
    /// Fails with [`CacheError::InvalidConfiguration`] when the backend
    /// cannot be reached or initialized.
    pub async fn new(options: CacheOptions) -> CacheResult<Self> {
        let store = create_store(&options).await?;
        Ok(Self::with_store(store, options))
    }

    /// Create a cache over an existing store
    pub fn with_store(store: Arc<dyn StreamStore>, options: CacheOptions) -> Self {
        Self {
            store,
            options: Arc::new(options),
        }
    }

    /// Get configuration reference
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Scope a logical key by this cache's namespace
    pub fn key(&self, logical_key: &str) -> CacheKey {
        CacheKey::new(self.options.instance_name.as_str(), logical_key)
    }

    /// Storage identifier of a logical key within this cache's namespace
    pub fn identifier(&self, logical_key: &str) -> StorageIdentifier {
        self.key(logical_key).identifier()
    }

    /// Open the cached stream for `logical_key`, or `None` on a miss
    pub async fn try_get(&self, logical_key: &str) -> CacheResult<Option<CacheReader>> {
        let id = self.identifier(logical_key);
        let reader = self.store.open(&id).await?;
        debug!(
            key = logical_key,
            id = %id,
            hit = reader.is_some(),
            "Cache lookup"
        );
        Ok(reader)
    }

    /// Check whether a live entry exists without reading it
    pub async fn exists(&self, logical_key: &str) -> CacheResult<bool> {
        self.store.contains(&self.identifier(logical_key)).await
    }

    /// Store everything `source` yields under `logical_key`.
    ///
    /// On any failure the staged write is discarded and the previous entry,
    /// if any, stays in place.
    pub async fn set<R>(
        &self,
        logical_key: &str,
        source: R,
        expiry: Expiry,
    ) -> CacheResult<EntryMetadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.set_with_cancel(logical_key, source, expiry, &CancellationToken::new())
            .await
    }

    /// Store an in-memory value under `logical_key`
    pub async fn set_bytes(
        &self,
        logical_key: &str,
        data: impl Into<Bytes>,
        expiry: Expiry,
    ) -> CacheResult<EntryMetadata> {
        let data = data.into();
        self.set(logical_key, &data[..], expiry).await
    }

    /// Like [`StreamCache::set`], aborting with [`CacheError::Canceled`] once
    /// `cancel` fires. Cancellation is observed between chunks and while
    /// waiting on the source.
    pub async fn set_with_cancel<R>(
        &self,
        logical_key: &str,
        mut source: R,
        expiry: Expiry,
        cancel: &CancellationToken,
    ) -> CacheResult<EntryMetadata>
    where
        R: AsyncRead + Unpin + Send,
    {
        let id = self.identifier(logical_key);
        let expires_at = expiry.resolve(self.options.default_expiration, SystemTime::now());

        let mut handle = self.store.create(&id, expires_at).await?;
        if let Err(e) = self.copy_into(&mut source, &mut handle, cancel).await {
            let written = handle.bytes_written();
            if let Err(abort_err) = self.store.abort(handle).await {
                warn!(id = %id, error = %abort_err, "Failed to abort staged cache entry");
            }
            warn!(key = logical_key, id = %id, written, error = %e, "Cache write failed");
            return Err(e);
        }

        let metadata = self.store.commit(handle).await?;
        debug!(
            key = logical_key,
            id = %id,
            size = metadata.content_length,
            "Cached stream"
        );
        Ok(metadata)
    }

    async fn copy_into<R>(
        &self,
        source: &mut R,
        handle: &mut StagingHandle,
        cancel: &CancellationToken,
    ) -> CacheResult<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CacheError::Canceled),
                read = source.read(&mut buf) => read.storage_context(|| "reading source stream")?,
            };
            if n == 0 {
                break;
            }

            handle
                .write_all(&buf[..n])
                .await
                .storage_context(|| format!("writing entry {}", handle.identifier()))?;
        }
        Ok(())
    }

    /// Remove the entry for `logical_key`; a missing entry is not an error
    pub async fn remove(&self, logical_key: &str) -> CacheResult<()> {
        self.store.remove(&self.identifier(logical_key)).await
    }

    /// Remove expired entries from the backing store.
    ///
    /// The store is shared by every instance with the same configuration,
    /// so this sweeps all namespaces.
    pub async fn sweep(&self) -> CacheResult<SweepStats> {
        self.store.sweep().await
    }

    /// Remove every entry from the backing store, across namespaces
    pub async fn clear(&self) -> CacheResult<()> {
        self.store.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::Path;
    use std::time::Duration;

    use futures::stream;
    use tokio_util::io::StreamReader;

    #[inline]
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    async fn file_cache(root: &Path, instance: &str) -> StreamCache {
        let options = CacheOptions::new(root.to_string_lossy(), instance).with_chunk_size(1024);
        StreamCache::new(options).await.unwrap()
    }

    async fn get(cache: &StreamCache, key: &str) -> Option<Vec<u8>> {
        let reader = cache.try_get(key).await.unwrap()?;
        Some(reader.into_bytes().await.unwrap().to_vec())
    }

    fn staging_files(root: &Path) -> usize {
        std::fs::read_dir(root.join("staging")).unwrap().count()
    }

    #[tokio::test]
    async fn test_users_scenario() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;

        cache
            .set_bytes("GET /users/42", r#"{"id":42}"#, Expiry::Default)
            .await
            .unwrap();
        assert_eq!(
            get(&cache, "GET /users/42").await.unwrap(),
            br#"{"id":42}"#.to_vec()
        );

        cache.remove("GET /users/42").await.unwrap();
        assert!(get(&cache, "GET /users/42").await.is_none());
    }

    #[tokio::test]
    async fn test_round_trip_including_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;
        let large: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        for (key, data) in [("empty", Vec::new()), ("small", b"abc".to_vec()), ("large", large)] {
            let metadata = cache.set(key, data.as_slice(), Expiry::Never).await.unwrap();
            assert_eq!(metadata.content_length, data.len() as u64);
            assert_eq!(get(&cache, key).await.unwrap(), data, "round trip of {key}");
        }

        // The empty logical key is a valid key too
        cache.set_bytes("", "root", Expiry::Never).await.unwrap();
        assert_eq!(get(&cache, "").await.unwrap(), b"root");
    }

    #[tokio::test]
    async fn test_memory_backend_round_trip() {
        let cache = StreamCache::new(CacheOptions::new("memory://", "svc-a"))
            .await
            .unwrap();
        cache.set_bytes("k", "value", Expiry::Never).await.unwrap();
        assert_eq!(get(&cache, "k").await.unwrap(), b"value");
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let a = file_cache(dir.path(), "svc-a").await;
        let b = file_cache(dir.path(), "svc-b").await;

        a.set_bytes("GET /shared", "from a", Expiry::Never).await.unwrap();
        assert!(get(&b, "GET /shared").await.is_none());
        assert!(!b.exists("GET /shared").await.unwrap());

        b.set_bytes("GET /shared", "from b", Expiry::Never).await.unwrap();
        assert_eq!(get(&a, "GET /shared").await.unwrap(), b"from a");
        assert_eq!(get(&b, "GET /shared").await.unwrap(), b"from b");
    }

    #[tokio::test]
    async fn test_miss_on_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;

        assert!(cache.try_get("never set").await.unwrap().is_none());
        assert!(!cache.exists("never set").await.unwrap());
        cache.remove("never set").await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_entry_misses_and_is_swept() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;
        let past = SystemTime::now() - Duration::from_secs(1);

        cache.set_bytes("stale", "old", Expiry::At(past)).await.unwrap();
        cache.set_bytes("stale-2", "old", Expiry::At(past)).await.unwrap();
        assert!(cache.try_get("stale").await.unwrap().is_none());

        cache.sweep().await.unwrap();
        let entries = dir.path().join("entries");
        for key in ["stale", "stale-2"] {
            let id = cache.identifier(key);
            assert!(!entries.join(id.shard()).join(id.as_str()).exists());
        }
    }

    #[tokio::test]
    async fn test_default_expiration_applies() {
        let cache = StreamCache::new(
            CacheOptions::new("memory://", "svc-a").with_default_expiration(Duration::from_secs(60)),
        )
        .await
        .unwrap();

        let metadata = cache.set_bytes("k", "v", Expiry::Default).await.unwrap();
        let ttl = metadata.expires_at_ms.unwrap() - metadata.created_at_ms;
        assert!((59_000..=61_000).contains(&ttl), "unexpected ttl {ttl}");

        let metadata = cache.set_bytes("k", "v", Expiry::Never).await.unwrap();
        assert!(metadata.expires_at_ms.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_writers_last_commit_wins() {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;
        let b1 = vec![b'a'; 256 * 1024];
        let b2 = vec![b'b'; 256 * 1024];

        // Once a commit has completed, no reader may observe a miss
        cache
            .set("GET /contended", b1.as_slice(), Expiry::Never)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for data in [b2.clone(), b1.clone(), b2.clone(), b1.clone()] {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache.set("GET /contended", data.as_slice(), Expiry::Never).await
            }));
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let (b1, b2) = (b1.clone(), b2.clone());
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let data = get(&cache, "GET /contended")
                            .await
                            .expect("a committed entry must stay visible");
                        assert!(data == b1 || data == b2, "observed a mixed entry");
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        for reader in readers {
            reader.await.unwrap();
        }

        let data = get(&cache, "GET /contended").await.unwrap();
        assert!(data == b1 || data == b2);
        assert_eq!(staging_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_far_future_expiration_is_kept() {
        let cache = StreamCache::new(
            CacheOptions::new("memory://", "svc-a")
                .with_default_expiration(Duration::from_secs(u64::MAX)),
        )
        .await
        .unwrap();

        let metadata = cache.set_bytes("k", "v", Expiry::Default).await.unwrap();
        assert!(metadata.expires_at_ms.is_none());

        let metadata = cache
            .set_bytes("k", "w", Expiry::After(Duration::MAX))
            .await
            .unwrap();
        assert!(metadata.expires_at_ms.is_none());
        assert_eq!(get(&cache, "k").await.unwrap(), b"w");
    }

    #[test]
    fn test_keys_are_scoped_by_instance_name() {
        let cache = StreamCache::with_store(
            Arc::new(crate::cache::MemoryStore::new(1024).unwrap()),
            CacheOptions::new("memory://", "svc-a"),
        );

        let key = cache.key("GET /users/42");
        assert_eq!(key, CacheKey::new("svc-a", "GET /users/42"));
        assert_eq!(
            cache.identifier("GET /users/42"),
            StorageIdentifier::derive("svc-a", "GET /users/42")
        );
    }

    #[tokio::test]
    async fn test_source_error_leaves_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;
        cache.set_bytes("k", "before", Expiry::Never).await.unwrap();

        let failing = StreamReader::new(stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset")),
        ]));
        let err = cache.set("k", failing, Expiry::Never).await.unwrap_err();

        assert!(err.is_storage_failure());
        assert_eq!(get(&cache, "k").await.unwrap(), b"before");
        assert_eq!(staging_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_copy_leaves_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = file_cache(dir.path(), "svc-a").await;
        cache.set_bytes("k", "before", Expiry::Never).await.unwrap();

        let (mut writer, source) = tokio::io::duplex(64);
        writer.write_all(b"first chunk").await.unwrap();

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        // The writer stays open, so the copy is stuck waiting for more data
        let err = cache
            .set_with_cancel("k", source, Expiry::Never, &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();
        drop(writer);

        assert!(matches!(err, CacheError::Canceled));
        assert_eq!(get(&cache, "k").await.unwrap(), b"before");
        assert_eq!(staging_files(dir.path()), 0);

        let err = cache
            .set_with_cancel("fresh", b"data".as_slice(), Expiry::Never, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Canceled));
        assert!(get(&cache, "fresh").await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"").unwrap();

        for configuration in [file.to_string_lossy().into_owned(), "ftp://host/cache".to_string()] {
            let err = StreamCache::new(CacheOptions::new(configuration, "svc-a"))
                .await
                .unwrap_err();
            assert!(matches!(err, CacheError::InvalidConfiguration(_)));
        }
    }
}
