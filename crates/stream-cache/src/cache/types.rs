//! # Cache Types
//!
//! This module defines common types used across the caching system.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Default age after which an orphaned staging file may be reclaimed
pub const DEFAULT_STALE_STAGING_AFTER: Duration = Duration::from_secs(60 * 60);

/// Default capacity of the in-memory backend
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Default size of the copy buffer used when storing a stream
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Options a [`StreamCache`](crate::cache::StreamCache) is constructed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Backend locator, e.g. `file:///var/cache/app`, a bare path, or `memory://`
    pub configuration: String,
    /// Namespace every key of the cache is scoped by
    pub instance_name: String,
    /// Expiration applied when a write does not specify one
    pub default_expiration: Option<Duration>,
    /// Staging files older than this are considered orphaned
    pub stale_staging_after: Duration,
    /// Capacity of the in-memory backend in bytes
    pub max_memory_bytes: u64,
    /// Size of the buffer used to copy source streams
    pub chunk_size: usize,
}

impl CacheOptions {
    pub fn new(configuration: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            instance_name: instance_name.into(),
            default_expiration: None,
            stale_staging_after: DEFAULT_STALE_STAGING_AFTER,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the default expiration
    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = Some(expiration);
        self
    }

    /// Set the default expiration as an Option
    pub fn with_default_expiration_option(mut self, expiration: Option<Duration>) -> Self {
        self.default_expiration = expiration;
        self
    }

    pub fn with_stale_staging_after(mut self, age: Duration) -> Self {
        self.stale_staging_after = age;
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Expiration requested for a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the cache's default expiration
    #[default]
    Default,
    /// Never expire
    Never,
    /// Expire after the given duration from now
    After(Duration),
    /// Expire at the given instant
    At(SystemTime),
}

impl Expiry {
    /// Resolve to an absolute instant, relative to `now`.
    ///
    /// A duration reaching past the representable range never expires.
    pub fn resolve(self, default: Option<Duration>, now: SystemTime) -> Option<SystemTime> {
        match self {
            Expiry::Default => default.and_then(|d| now.checked_add(d)),
            Expiry::Never => None,
            Expiry::After(d) => now.checked_add(d),
            Expiry::At(at) => Some(at),
        }
    }
}

/// Metadata for a committed entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Storage identifier of the entry
    pub identifier: String,
    /// Length of the content in bytes
    pub content_length: u64,
    /// When the entry was created, in milliseconds since the epoch
    pub created_at_ms: u64,
    /// When the entry expires, in milliseconds since the epoch
    pub expires_at_ms: Option<u64>,
}

impl EntryMetadata {
    pub fn created_at(&self) -> SystemTime {
        from_unix_ms(self.created_at_ms)
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at_ms.map(from_unix_ms)
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires_at_ms
            .is_some_and(|expires_at| expires_at <= unix_ms(now))
    }
}

/// Outcome of a sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Committed entries inspected
    pub scanned: usize,
    /// Expired entries removed
    pub removed_entries: usize,
    /// Orphaned staging files removed
    pub removed_staging: usize,
}

pub(crate) fn unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

pub(crate) fn from_unix_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
