use std::io::Cursor;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::cache::{CacheReader, Expiry, StreamCache};
use crate::error::RequestError;
use crate::http::config::HttpCacheConfig;
use crate::http::{HttpRequest, HttpResponse, Requester, ResponseBody, ResponseSource};

/// Only idempotent, side-effect free requests are served from the cache
pub fn is_cacheable(request: &HttpRequest) -> bool {
    request.method == Method::GET
}

/// Build the logical cache key of a request: method, URL without fragment,
/// and the values of the headers listed in `vary_headers`.
pub fn request_key(request: &HttpRequest, vary_headers: &[HeaderName]) -> String {
    let mut url = request.url.clone();
    url.set_fragment(None);

    let mut key = format!("{} {}", request.method, url);
    for name in vary_headers {
        for value in request.headers.get_all(name) {
            key.push('\n');
            key.push_str(name.as_str());
            key.push_str(": ");
            key.push_str(&String::from_utf8_lossy(value.as_bytes()));
        }
    }
    key
}

/// Decorator that serves cacheable requests from a [`StreamCache`] and
/// stores successful network responses in it.
///
/// Cache failures never fail a request: a broken lookup falls through to
/// the network and a failed store still returns the network response.
///
/// Only the body is cached. A hit is answered with status 200 and a
/// `Content-Length` header; other network headers such as `Content-Type`
/// are not replayed.
#[derive(Debug, Clone)]
pub struct CachingRequester<R> {
    inner: R,
    cache: StreamCache,
    config: HttpCacheConfig,
    expiry: Expiry,
}

impl<R: Requester> CachingRequester<R> {
    pub fn new(inner: R, cache: StreamCache) -> Self {
        Self::with_config(inner, cache, HttpCacheConfig::default())
    }

    pub fn with_config(inner: R, cache: StreamCache, config: HttpCacheConfig) -> Self {
        Self {
            inner,
            cache,
            config,
            expiry: Expiry::Default,
        }
    }

    /// Expiration applied to stored responses
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn cached_response(reader: CacheReader) -> HttpResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_LENGTH,
            HeaderValue::from(reader.metadata().content_length),
        );

        HttpResponse {
            status: StatusCode::OK,
            headers,
            body: Box::pin(reader),
            source: ResponseSource::Cache,
        }
    }

    /// Buffer the body of a successful response, store it, and hand the
    /// buffered copy back to the caller
    async fn store_response(
        &self,
        key: &str,
        response: HttpResponse,
    ) -> Result<HttpResponse, RequestError> {
        let HttpResponse {
            status,
            headers,
            mut body,
            source,
        } = response;

        let declared_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared_length.is_some_and(|len| len > self.config.max_body_bytes) {
            debug!(key, "Response body too large to cache");
            return Ok(HttpResponse {
                status,
                headers,
                body,
                source,
            });
        }

        let limit = self.config.max_body_bytes;
        let mut data = Vec::new();
        (&mut body)
            .take(limit.saturating_add(1))
            .read_to_end(&mut data)
            .await
            .map_err(RequestError::Body)?;

        if data.len() as u64 > limit {
            debug!(key, "Response body too large to cache");
            let body: ResponseBody = Box::pin(Cursor::new(data).chain(body));
            return Ok(HttpResponse {
                status,
                headers,
                body,
                source,
            });
        }

        let data = bytes::Bytes::from(data);
        if let Err(e) = self.cache.set_bytes(key, data.clone(), self.expiry).await {
            warn!(key, error = %e, "Failed to cache response");
        }

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(Cursor::new(data)),
            source,
        })
    }
}

#[async_trait]
impl<R: Requester> Requester for CachingRequester<R> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        if !is_cacheable(&request) {
            return self.inner.execute(request).await;
        }

        let key = request_key(&request, &self.config.vary_headers);
        match self.cache.try_get(&key).await {
            Ok(Some(reader)) => {
                debug!(key, "Serving response from cache");
                return Ok(Self::cached_response(reader));
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "Cache lookup failed, using network"),
        }

        let response = self.inner.execute(request).await?;
        if response.status != StatusCode::OK {
            return Ok(response);
        }

        self.store_response(&key, response).await
    }
}
