//! # Stream Cache
//!
//! A pluggable cache for byte streams such as HTTP response bodies.
//!
//! ## Features
//!
//! - Namespaced keys hashed into filesystem-safe identifiers
//! - File-backed store with staged writes and atomic publish
//! - In-memory store for tests and short-lived processes
//! - Expiry with lazy reclamation and an explicit sweep
//! - Cancellable writes that never leave partial entries
//! - A composable HTTP requester decorator with read-through/write-through caching

pub mod bytes_stream;
pub mod cache;
pub mod error;
pub mod http;
pub mod settings;

pub use cache::{
    CacheKey, CacheOptions, CacheReader, EntryMetadata, Expiry, StorageIdentifier, StreamCache,
    StreamStore, SweepStats,
};
pub use error::{CacheError, CacheResult, RequestError, SettingsError};
pub use settings::CacheSettings;

// Re-export HTTP integration
pub use http::{
    CachingRequester, HttpCacheConfig, HttpClientConfig, HttpRequest, HttpResponse, Requester,
    ReqwestRequester, ResponseSource,
};

pub use tokio_util::sync::CancellationToken;
