//! # HTTP Integration
//!
//! A small capability trait for issuing requests, a reqwest-backed
//! transport, and a decorator that serves cacheable requests from a
//! [`StreamCache`](crate::cache::StreamCache).

use std::fmt;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use crate::error::RequestError;

mod caching;
mod client;
mod config;

pub use caching::{CachingRequester, is_cacheable, request_key};
pub use client::{ReqwestRequester, create_client};
pub use config::{HttpCacheConfig, HttpClientConfig};

/// Streamed response body
pub type ResponseBody = Pin<Box<dyn AsyncRead + Send>>;

/// A request to issue through a [`Requester`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Where a response body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub source: ResponseSource,
}

impl HttpResponse {
    /// Read the whole body into memory
    pub async fn bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Capability to execute HTTP requests
#[async_trait]
pub trait Requester: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RequestError>;
}

#[async_trait]
impl<R: Requester + ?Sized> Requester for std::sync::Arc<R> {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        (**self).execute(request).await
    }
}
