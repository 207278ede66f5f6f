// src/models/target.rs

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};

/// A monitored positions page, keyed by its URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Page URL, also the state key
    pub url: String,

    /// Owner / display name shown in alerts
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    /// Operator's rating label
    #[serde(default)]
    pub rating: String,

    /// Per-target extraction timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Target {
    /// State key for this target.
    pub fn key(&self) -> &str {
        &self.url
    }

    /// Effective per-attempt timeout.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Reject entries the monitor cannot work with.
    pub fn validate(&self) -> Result<()> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| AppError::config(format!("target url '{}': {}", self.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::config(format!(
                "target url '{}' must be http(s)",
                self.url
            )));
        }
        if self.display_name.trim().is_empty() {
            return Err(AppError::config(format!(
                "target '{}' has an empty display_name",
                self.url
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(AppError::config(format!(
                "target '{}' timeout_ms must be > 0",
                self.url
            )));
        }
        Ok(())
    }
}
