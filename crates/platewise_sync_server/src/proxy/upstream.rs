//! Connections to the internal replication server.

use async_trait::async_trait;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tracing::debug;
use url::Url;

use super::transport::{BoxSink, BoxSource, TransportError, split_upstream};

/// Opens one upstream connection per authorized client connection.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> Result<(BoxSink, BoxSource), TransportError>;
}

/// Connector that dials the configured internal sync URL with tokio-tungstenite.
pub struct TungsteniteConnector {
    url: Url,
    timeout: Duration,
}

impl TungsteniteConnector {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self { url, timeout }
    }
}

#[async_trait]
impl UpstreamConnector for TungsteniteConnector {
    async fn connect(&self) -> Result<(BoxSink, BoxSource), TransportError> {
        debug!("Connecting upstream to {}", self.url);
        let (stream, _response) = tokio::time::timeout(self.timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(split_upstream(stream))
    }
}
