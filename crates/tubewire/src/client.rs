//! Client configuration and builder.
//!
//! This is the entry point for applications: describe the server and the
//! reconnect policy, then [`connect`](ClientBuilder::connect) to get a
//! ready [`Session`].

use serde::{Deserialize, Serialize};
use tubewire_pipeline::PipelineConfig;
use tubewire_reconnect::BackoffConfig;
use tubewire_session::{Session, SessionConfig};
use tubewire_transport::{Connector, Endpoint, TcpConnector};

use crate::TubewireError;

/// Everything needed to start a client.
///
/// Serde-friendly so it can be embedded in an application's own config
/// file; missing fields take their defaults (`127.0.0.1:11300`, default
/// backoff and pipeline settings).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to connect to.
    pub endpoint: Endpoint,
    /// Reconnect and pipeline settings.
    pub session: SessionConfig,
}

/// Builder for configuring and connecting a client session.
///
/// # Example
///
/// ```rust,ignore
/// use tubewire::prelude::*;
///
/// let session = ClientBuilder::new()
///     .endpoint("queue.internal", 11300)
///     .max_retries(10)
///     .connect()
///     .await?;
/// session.put("hello").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Sets the server address.
    pub fn endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.endpoint = Endpoint::new(host, port);
        self
    }

    /// Sets the reconnect backoff.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.session.backoff = backoff;
        self
    }

    /// Gives up after `max_retries` consecutive failed attempts.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.session.backoff.max_retries = Some(max_retries);
        self
    }

    /// Sets the per-connection pipeline settings.
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.config.session.pipeline = pipeline;
        self
    }

    /// Returns the configuration built so far.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connects over TCP and waits until the session is ready.
    ///
    /// The session keeps reconnecting in the background after this
    /// returns.
    ///
    /// # Errors
    /// Fails if the session gives up before the first connection is ready
    /// (only possible with a retry limit).
    pub async fn connect(self) -> Result<Session, TubewireError> {
        self.connect_with(TcpConnector::new()).await
    }

    /// Like [`connect`](Self::connect), with a custom connector.
    pub async fn connect_with<K: Connector>(
        self,
        connector: K,
    ) -> Result<Session, TubewireError> {
        let ClientConfig { endpoint, session } = self.config;
        tracing::info!(%endpoint, "starting client session");

        let session = Session::with_connector(connector, session);
        session.connect(endpoint).await?;
        session.ready().await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_default_config_targets_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint.to_string(), "127.0.0.1:11300");
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_builder_sets_fields() {
        let builder = ClientBuilder::new()
            .endpoint("queue", 4000)
            .backoff(BackoffConfig::fixed(
                Duration::from_millis(5),
                2.0,
                Duration::from_secs(1),
            ))
            .max_retries(3)
            .pipeline(PipelineConfig {
                max_line_length: 1024,
                ..PipelineConfig::default()
            });

        let config = builder.config();
        assert_eq!(config.endpoint, Endpoint::new("queue", 4000));
        assert_eq!(config.session.backoff.initial, Duration::from_millis(5));
        assert_eq!(config.session.backoff.max_retries, Some(3));
        assert_eq!(config.session.pipeline.max_line_length, 1024);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"endpoint": {"host": "q", "port": 1}}"#).unwrap();
        assert_eq!(config.endpoint, Endpoint::new("q", 1));
        assert_eq!(config.session, SessionConfig::default());
    }
}
