//! Registry configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SpanError, SpanResult};

/// Tunables for the coordinator's span registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpansConfig {
    /// Record client-submitted source-code snippets on the spans their tasks
    /// ran under. Snippet capture costs memory proportional to the number of
    /// distinct submissions, so large clusters may want it off.
    pub capture_code: bool,
}

impl Default for SpansConfig {
    fn default() -> Self {
        Self { capture_code: true }
    }
}

impl SpansConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(raw: &str) -> SpanResult<Self> {
        toml::from_str(raw).map_err(|e| SpanError::Config(e.to_string()))
    }

    /// Load a configuration from a TOML file.
    pub fn from_toml_path(path: impl AsRef<Path>) -> SpanResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
