// src/services/message.rs

//! Alert text composition (Telegram Markdown).

use std::fmt::Write;

use crate::models::{PositionRecord, Target};
use crate::pipeline::ChangeResult;

/// Status line for a first observation.
pub const FIRST_OBSERVATION_STATUS: &str = "First-time positions detected";

/// Status line for a closure.
pub const CLOSURE_STATUS: &str = "All positions closed";

/// Why an alert is sent.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    /// Positions appeared for a target with no prior positions
    FirstObservation,
    /// The detector reported differences
    Change(ChangeResult),
    /// A target with open positions now reports none
    Closure,
}

impl AlertKind {
    pub fn status(&self) -> String {
        match self {
            Self::FirstObservation => FIRST_OBSERVATION_STATUS.to_string(),
            Self::Change(result) => result.summary(),
            Self::Closure => CLOSURE_STATUS.to_string(),
        }
    }
}

/// Compose the alert for `target`, listing `positions`.
///
/// For a closure `positions` is the last known snapshot; otherwise it is the
/// freshly observed one.
pub fn compose(target: &Target, kind: &AlertKind, positions: &[PositionRecord]) -> String {
    render(target, Some(&kind.status()), positions)
}

/// Render the alert body; an empty or missing status omits the status line.
pub fn render(target: &Target, status: Option<&str>, positions: &[PositionRecord]) -> String {
    let mut text = String::new();

    // Writing into a String cannot fail.
    let _ = write!(
        text,
        "*Owner*: {}\n*Description*: {}\n*Our Rating*: {}\n\n",
        target.display_name, target.description, target.rating
    );
    if let Some(status) = status.filter(|s| !s.is_empty()) {
        let _ = write!(text, "*Status*: {}\n\n", status);
    }
    let _ = write!(text, "*Positions Data for URL:*\n{}\n\n", target.url);

    for (index, position) in positions.iter().enumerate() {
        let _ = write!(
            text,
            "*Position {}:* {}\n- *Collateral:* {}\n- *Entry Price:* {}\n- *Liquidation Price:* {}\n\n",
            index + 1,
            position.token,
            position.collateral,
            position.entry_price,
            position.liquidation_price
        );
    }

    text
}
