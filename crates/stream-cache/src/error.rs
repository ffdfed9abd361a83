use std::io;

/// Errors raised by the stream cache.
///
/// A cache miss is not an error: lookups return `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("storage failure while {context}: {source}")]
    StorageFailure {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cache write canceled")]
    Canceled,
}

impl CacheError {
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        CacheError::StorageFailure {
            context: context.into(),
            source,
        }
    }

    pub fn is_storage_failure(&self) -> bool {
        matches!(self, CacheError::StorageFailure { .. })
    }
}

/// Errors raised by HTTP requesters
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to read response body: {0}")]
    Body(#[source] io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Errors raised while assembling cache settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Attach a storage context to an I/O result.
pub(crate) trait StorageContext<T> {
    fn storage_context<F, C>(self, context: F) -> CacheResult<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> StorageContext<T> for io::Result<T> {
    fn storage_context<F, C>(self, context: F) -> CacheResult<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| CacheError::storage(context(), e))
    }
}
