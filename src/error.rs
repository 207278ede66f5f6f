// src/error.rs

//! Unified error handling for the position monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error (invalid settings or target entries)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An extraction attempt ran past its time budget
    #[error("Extraction timed out for {target} after {timeout_ms}ms")]
    ExtractionTimeout { target: String, timeout_ms: u64 },

    /// Navigation or page-structure failure (not a legitimate empty state)
    #[error("Extraction failed for {target}: {message}")]
    Extraction { target: String, message: String },

    /// A numeric field could not be parsed
    #[error("Cannot parse {field} value '{value}'")]
    Parse { field: String, value: String },

    /// Delivery to a single destination failed
    #[error("Delivery to {destination} failed: {message}")]
    Delivery {
        destination: String,
        message: String,
    },

    /// State file could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an extraction error with the target as context.
    pub fn extraction(target: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Extraction {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a numeric parse error.
    pub fn parse(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a delivery error for one destination.
    pub fn delivery(destination: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Delivery {
            destination: destination.into(),
            message: message.to_string(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(message: impl fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    /// Whether the error came from the extraction layer.
    pub fn is_extraction(&self) -> bool {
        matches!(
            self,
            Self::ExtractionTimeout { .. } | Self::Extraction { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_target() {
        let err = AppError::ExtractionTimeout {
            target: "https://example.com/a".to_string(),
            timeout_ms: 1500,
        };
        assert_eq!(
            err.to_string(),
            "Extraction timed out for https://example.com/a after 1500ms"
        );
        assert!(err.is_extraction());
    }

    #[test]
    fn test_delivery_is_not_extraction() {
        let err = AppError::delivery("12345", "bad gateway");
        assert!(!err.is_extraction());
        assert!(err.to_string().contains("12345"));
    }
}
