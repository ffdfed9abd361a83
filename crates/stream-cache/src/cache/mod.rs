//! # Cache System
//!
//! A namespaced cache of opaque byte streams. Entries are written through
//! staging handles and published atomically, so readers only ever see
//! complete content.

// Module declarations
pub mod factory;
mod key;
mod locks;
pub mod store;
mod stream_cache;
mod types;

// Re-export primary types from our various modules
pub use factory::{BackendKind, create_store};
pub use key::{CacheKey, StorageIdentifier};
pub use store::{CacheReader, FileStore, MemoryStore, StagingHandle, StreamStore};
pub use stream_cache::StreamCache;
pub use types::{
    CacheOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_STALE_STAGING_AFTER,
    EntryMetadata, Expiry, SweepStats,
};
