// src/models/mod.rs

//! Domain models for the position monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod position;
mod target;

// Re-export all public types
pub use config::{
    Config, ExtractorConfig, ExtractorKind, LoggingConfig, MonitorConfig, NotifierConfig,
    ProcessConfig, StorageConfig, TableSelectors, TriggerConfig,
};
pub use position::{
    ComparisonKey, PollOutcome, PollStatus, PositionRecord, RecordField, Snapshot,
};
pub use target::Target;
