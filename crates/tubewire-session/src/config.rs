//! Session configuration.

use serde::{Deserialize, Serialize};
use tubewire_pipeline::PipelineConfig;
use tubewire_reconnect::BackoffConfig;

/// Configuration for a [`Session`](crate::Session).
///
/// Groups the settings of the layers the session drives. Every field has a
/// default, so a partial config file (or none) works.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Reconnect delays and retry limit.
    pub backoff: BackoffConfig,
    /// Per-connection framing limits.
    pub pipeline: PipelineConfig,
}
