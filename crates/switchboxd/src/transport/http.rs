use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::Method;
use super::Transport;
use crate::engine::StatusRecord;
use crate::error::Error;
use crate::error::Result;

/// Real device transport using reqwest
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Option<StatusRecord>> {
        debug!("{} {}", method, url);

        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        }
        .header(CONTENT_TYPE, "application/json");

        if let Some(payload) = payload {
            debug!("Sending payload: {}", payload);
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        debug!("Raw response: {}", body);
        decode_status(&body)
    }
}

/// Decode a device response body.
///
/// The HTTP status code is not inspected: an error page fails to decode and
/// surfaces as [`Error::Decode`].
pub fn decode_status(body: &str) -> Result<Option<StatusRecord>> {
    if body.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| Error::Decode(e.to_string()))
}
