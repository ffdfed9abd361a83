use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::cache::store::{FileStore, MemoryStore, StreamStore};
use crate::cache::types::CacheOptions;
use crate::error::{CacheError, CacheResult};

const FILE_SCHEME: &str = "file";
const MEMORY_SCHEME: &str = "memory";

/// Backend selected by a configuration string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// File store rooted at the given directory
    File(PathBuf),
    /// In-process memory store
    Memory,
}

impl BackendKind {
    /// Detect the backend from a configuration string.
    ///
    /// Accepts `file://<path>`, `memory://` (or plain `memory`) and bare
    /// filesystem paths.
    pub fn detect(configuration: &str) -> CacheResult<Self> {
        let configuration = configuration.trim();
        if configuration.is_empty() {
            return Err(CacheError::InvalidConfiguration(
                "configuration string is empty".to_string(),
            ));
        }

        if configuration.eq_ignore_ascii_case(MEMORY_SCHEME) {
            return Ok(BackendKind::Memory);
        }

        match Url::parse(configuration) {
            // Single letter schemes are Windows drive letters
            Ok(url) if url.scheme().len() > 1 => match url.scheme() {
                FILE_SCHEME => url.to_file_path().map(BackendKind::File).map_err(|_| {
                    CacheError::InvalidConfiguration(format!(
                        "not a local file location: {configuration}"
                    ))
                }),
                MEMORY_SCHEME => Ok(BackendKind::Memory),
                other => Err(CacheError::InvalidConfiguration(format!(
                    "unsupported cache backend `{other}` in {configuration}"
                ))),
            },
            _ => Ok(BackendKind::File(PathBuf::from(configuration))),
        }
    }
}

/// Create the store named by `options.configuration`
pub async fn create_store(options: &CacheOptions) -> CacheResult<Arc<dyn StreamStore>> {
    let store: Arc<dyn StreamStore> = match BackendKind::detect(&options.configuration)? {
        BackendKind::File(root) => {
            Arc::new(FileStore::new(root, options.stale_staging_after).await?)
        }
        BackendKind::Memory => Arc::new(MemoryStore::new(options.max_memory_bytes)?),
    };

    debug!(
        backend = store.name(),
        instance = %options.instance_name,
        "Created stream store"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_backends() {
        assert_eq!(BackendKind::detect("memory").unwrap(), BackendKind::Memory);
        assert_eq!(BackendKind::detect("memory://").unwrap(), BackendKind::Memory);
        assert_eq!(
            BackendKind::detect("memory://shared").unwrap(),
            BackendKind::Memory
        );
        assert_eq!(
            BackendKind::detect("/tmp/cache").unwrap(),
            BackendKind::File(PathBuf::from("/tmp/cache"))
        );
        assert_eq!(
            BackendKind::detect("relative/cache").unwrap(),
            BackendKind::File(PathBuf::from("relative/cache"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_file_url() {
        assert_eq!(
            BackendKind::detect("file:///tmp/cache").unwrap(),
            BackendKind::File(PathBuf::from("/tmp/cache"))
        );
    }

    #[test]
    fn test_detect_rejects_unknown() {
        for configuration in ["", "   ", "redis://localhost:6379"] {
            assert!(
                matches!(
                    BackendKind::detect(configuration),
                    Err(CacheError::InvalidConfiguration(_))
                ),
                "{configuration:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_create_store() {
        let dir = tempfile::tempdir().unwrap();
        let options = CacheOptions::new(dir.path().to_string_lossy(), "svc");
        assert_eq!(create_store(&options).await.unwrap().name(), "file");

        let options = CacheOptions::new("memory://", "svc");
        assert_eq!(create_store(&options).await.unwrap().name(), "memory");
    }
}
