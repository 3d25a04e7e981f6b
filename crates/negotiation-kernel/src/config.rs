//! Configuration types for a negotiation run.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::GridDims;
use crate::proposal::ValidationMode;

/// Rounds played when nobody asks to stop.
pub const DEFAULT_MAX_ROUNDS: usize = 4;

/// Literal marker in a rationale that ends the negotiation.
pub const TERMINATION_TOKEN: &str = "TERMINATE";

/// Which grid a validated proposal is drawn onto.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalAnchor {
    /// Draw onto the original city map, so each proposal replaces the last.
    #[default]
    BaseGrid,
    /// Draw onto the latest working grid, so proposals accumulate.
    CurrentGrid,
}

/// Top-level negotiation configuration.
///
/// Loaded from JSON at runtime; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Upper bound on Developer→Resident rounds
    pub max_rounds: usize,

    /// Expected dimensions of the city map
    pub dims: GridDims,

    /// Substring that ends the negotiation when found in a rationale
    pub termination_token: String,

    /// Terrain policy for proposals
    pub validation_mode: ValidationMode,

    /// Grid proposals are materialized onto
    pub anchor: ProposalAnchor,

    /// Per-call oracle timeout in milliseconds (None = wait indefinitely)
    pub oracle_timeout_ms: Option<u64>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            dims: GridDims::REFERENCE,
            termination_token: TERMINATION_TOKEN.to_string(),
            validation_mode: ValidationMode::Permissive,
            anchor: ProposalAnchor::BaseGrid,
            oracle_timeout_ms: None,
        }
    }
}

/// Errors loading or checking a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NegotiationConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Reject settings the orchestrator cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".into()));
        }
        if self.dims.rows == 0 || self.dims.cols == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid dimensions must be non-zero, got {}",
                self.dims
            )));
        }
        if self.termination_token.trim().is_empty() {
            return Err(ConfigError::Invalid("termination_token must not be blank".into()));
        }
        Ok(())
    }

    pub fn oracle_timeout(&self) -> Option<Duration> {
        self.oracle_timeout_ms.map(Duration::from_millis)
    }
}
