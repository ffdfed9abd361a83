use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

const DEFAULT_USER_AGENT: &str = concat!("stream-cache/", env!("CARGO_PKG_VERSION"));

/// Configurable options for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Idle timeout for pooled connections
    pub pool_idle_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers sent with every request
    pub headers: HeaderMap,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpClientConfig::get_default_headers(),
            use_system_proxy: true,
        }
    }
}

impl HttpClientConfig {
    /// Merge custom headers over the defaults; custom values win
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers
    }
}

/// Settings of the caching decorator
#[derive(Debug, Clone)]
pub struct HttpCacheConfig {
    /// Request headers whose values become part of the cache key
    pub vary_headers: Vec<HeaderName>,
    /// Largest body that will be cached; bigger bodies are passed through
    pub max_body_bytes: u64,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            vary_headers: vec![reqwest::header::ACCEPT, reqwest::header::ACCEPT_LANGUAGE],
            max_body_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}
