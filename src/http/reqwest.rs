use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method};

use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// Connection-pool settings for [`ReqwestTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Whole-request timeout applied when the request carries none of its own.
    pub timeout: Duration,
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Default [`HttpTransport`] backed by a pooled `reqwest::Client`.
///
/// [`HttpTransport::close_idle_connections`] swaps in a fresh client; requests already
/// holding the previous client finish on it and its pool is released once they drop it.
pub struct ReqwestTransport {
    client: RwLock<Client>,
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Builds a transport with the given pool settings.
    pub fn new(config: TransportConfig) -> Result<Self, LLMError> {
        let client = Self::build_client(&config)?;
        Ok(Self {
            client: RwLock::new(client),
            config,
        })
    }

    pub fn default_client() -> Result<Self, LLMError> {
        Self::new(TransportConfig::default())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn build_client(config: &TransportConfig) -> Result<Client, LLMError> {
        Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build()
            .map_err(|err| LLMError::InvalidConfig {
                field: "transport".into(),
                reason: format!("failed to create reqwest client: {err}"),
            })
    }

    fn client(&self) -> Client {
        match self.client.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    fn build_request(&self, mut request: HttpRequest) -> Result<reqwest::RequestBuilder, LLMError> {
        let method = Self::method(request.method);
        let mut builder = self.client().request(method, &request.url);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        for (name, value) in request.headers.drain() {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| LLMError::Validation {
                    message: format!("invalid header name {name:?}: {err}"),
                })?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                LLMError::Validation {
                    message: format!("invalid header value for {header_name}: {err}"),
                }
            })?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(body) = request.body.take() {
            builder = builder.body(body);
        }

        Ok(builder)
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let endpoint = request.url.clone();
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::connection(endpoint.clone(), err))?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| LLMError::connection(endpoint, err))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let endpoint = request.url.clone();
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::connection(endpoint.clone(), err))?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| LLMError::connection(endpoint.clone(), err))
        });
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }

    fn close_idle_connections(&self) {
        let fresh = match Self::build_client(&self.config) {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(error = %err, "could not rebuild http client; keeping existing pool");
                return;
            }
        };
        let mut guard = match self.client.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = fresh;
        tracing::debug!("released idle http connections");
    }
}

/// Convenience constructor for a shared default transport.
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
