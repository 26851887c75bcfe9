//! HTTP transport seam
//!
//! The manager never talks to the network directly; it sends a
//! [`RequestConfig`] through this trait and gets back an [`HttpResponse`] or
//! an [`ApiError`]. Tests substitute mock transports here.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use chatwire_types::{ApiError, HttpMethod, HttpResponse, RequestConfig};

/// One opaque "send an HTTP request" capability
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, config: &RequestConfig) -> Result<HttpResponse, ApiError>;
}

/// Transport backed by a shared reqwest client
pub struct ReqwestTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout {
                timeout: self.request_timeout,
            }
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, config: &RequestConfig) -> Result<HttpResponse, ApiError> {
        debug!(method = %config.method, url = %config.url, "sending request");

        let mut builder = self
            .client
            .request(reqwest_method(config.method), &config.url);
        for (name, value) in &config.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &config.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let text = response.text().await.map_err(|e| self.map_error(e))?;
        // Non-JSON bodies are carried as a plain string
        let body: JsonValue =
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text));

        if status.is_success() {
            Ok(HttpResponse {
                status: status.as_u16(),
                headers,
                body,
            })
        } else {
            let message = body
                .get("error")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            Err(ApiError::from_status(status.as_u16(), message))
        }
    }
}
