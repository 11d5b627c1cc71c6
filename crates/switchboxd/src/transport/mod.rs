//! HTTP plumbing between the engine and the device.

mod http;

use async_trait::async_trait;

use crate::engine::StatusRecord;
use crate::error::Result;

pub use http::HttpTransport;
pub use http::decode_status;

/// HTTP method for a device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

/// Trait for device requests
///
/// This trait allows for mocking the device for testing purposes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and decode the response body as a status record.
    ///
    /// Returns `Ok(None)` when the device answered with an empty body.
    async fn send(
        &self,
        method: Method,
        url: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Option<StatusRecord>>;
}

#[cfg(test)]
pub use mock::MockTransport;
