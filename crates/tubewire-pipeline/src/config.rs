//! Pipeline configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for a pipelined connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest reply line accepted before the stream is considered
    /// corrupt. Raw bodies are not subject to this limit.
    ///
    /// Default: 16 KiB.
    pub max_line_length: usize,

    /// Largest raw section (body plus its `\r\n` trailer) a reply header
    /// may announce. A larger announcement closes the connection before
    /// any of the body is buffered.
    ///
    /// Default: 64 MiB.
    pub max_body_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_line_length: 16 * 1024,
            max_body_length: 64 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"max_line_length": 512}"#).unwrap();
        assert_eq!(config.max_line_length, 512);
        assert_eq!(config.max_body_length, PipelineConfig::default().max_body_length);
    }
}
