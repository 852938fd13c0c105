//! reqwest-backed transport

use super::{AskRequest, AskTransport, ByteStream, StreamError};
use crate::config::ClientConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use serde::Deserialize;

/// HTTP transport for the ask endpoint
///
/// Only a connect timeout is configured. Once the response has started the
/// stream may stay open for as long as the server keeps it open.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    health_url: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, StreamError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| StreamError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            health_url: config.health_url.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Probe the service health endpoint
    pub async fn health_check(&self) -> Result<bool, StreamError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .await
            .map_err(|e| StreamError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| StreamError::unknown(format!("Invalid health response: {e}")))?;
        Ok(health.status == "ok")
    }
}

#[async_trait]
impl AskTransport for HttpTransport {
    async fn open(&self, request: &AskRequest) -> Result<ByteStream, StreamError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .json(request);

        if let Some(session_id) = &request.session_id {
            builder = builder.query(&[("session_id", session_id.as_str())]);
        }

        let response = builder.send().await.map_err(|e| StreamError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::from_status(status.as_u16(), &body));
        }

        tracing::debug!(status = %status, endpoint = %self.endpoint, "Answer stream opened");

        let body = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| StreamError::from_reqwest(&e))
        });
        Ok(body.boxed())
    }
}
