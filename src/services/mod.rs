//! Collaborators at the edges of the monitor.
//!
//! - [`Extractor`]: fetches current positions ([`SessionExtractor`], [`ProcessExtractor`])
//! - [`Notifier`]: delivers alert text ([`TelegramNotifier`])
//! - [`compose`]: renders alert text

mod extractor;
mod message;
mod notifier;
mod process;

use std::sync::Arc;

pub use extractor::{Extractor, SessionExtractor};
pub use message::{AlertKind, CLOSURE_STATUS, FIRST_OBSERVATION_STATUS, compose, render};
pub use notifier::{DeliveryReport, Notifier, TelegramNotifier};
pub use process::ProcessExtractor;

use crate::error::Result;
use crate::models::{ExtractorConfig, ExtractorKind};

/// Build the extractor selected by `extractor.kind`.
pub fn build_extractor(config: &ExtractorConfig) -> Result<Arc<dyn Extractor>> {
    let extractor: Arc<dyn Extractor> = match config.kind {
        ExtractorKind::Session => Arc::new(SessionExtractor::new(config)?),
        ExtractorKind::Process => Arc::new(ProcessExtractor::new(config)?),
    };
    Ok(extractor)
}
