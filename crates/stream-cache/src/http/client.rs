use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::debug;

use crate::bytes_stream::BytesStreamReader;
use crate::error::RequestError;
use crate::http::config::HttpClientConfig;
use crate::http::{HttpRequest, HttpResponse, Requester, ResponseSource};

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpClientConfig) -> Result<Client, RequestError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    // Build platform default TLS configuration
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_platform_verifier()?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.pool_idle_timeout.is_zero() {
        client_builder = client_builder.pool_idle_timeout(config.pool_idle_timeout);
    }

    if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for requests");
    }

    client_builder.build().map_err(RequestError::from)
}

/// [`Requester`] that performs real network calls with reqwest
#[derive(Debug, Clone)]
pub struct ReqwestRequester {
    client: Client,
}

impl ReqwestRequester {
    pub fn new(config: &HttpClientConfig) -> Result<Self, RequestError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Requester for ReqwestRequester {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, RequestError> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        debug!(url = %response.url(), status = %status, "Received network response");

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(BytesStreamReader::new(response.bytes_stream())),
            source: ResponseSource::Network,
        })
    }
}
