//! Interception configuration

use crate::errors::{VigilError, VigilResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// How much detail denial errors carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialDetail {
    /// Include expression text and manager detail.
    #[default]
    Verbose,
    /// Only the denial category.
    Terse,
}

/// Options recognized when building interceptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterceptionConfig {
    /// Reject operations whose return cardinality cannot be determined.
    pub fail_on_ambiguous_cardinality: bool,
    /// Detail carried by denial errors.
    pub denial_reason_detail: DenialDetail,
    /// Publish an event for granted decisions as well as denials.
    pub publish_granted_events: bool,
}

impl InterceptionConfig {
    /// Strict configuration: ambiguous cardinality is rejected.
    pub fn strict() -> Self {
        Self {
            fail_on_ambiguous_cardinality: true,
            ..Self::default()
        }
    }

    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> VigilResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file.
    pub fn load_from_file(path: &Path) -> VigilResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            VigilError::configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), ?config, "Loaded interception config");
        Ok(config)
    }

    /// Set the denial detail level.
    pub fn with_denial_detail(mut self, detail: DenialDetail) -> Self {
        self.denial_reason_detail = detail;
        self
    }

    /// Enable or disable granted-event publishing.
    pub fn with_granted_events(mut self, enabled: bool) -> Self {
        self.publish_granted_events = enabled;
        self
    }
}
