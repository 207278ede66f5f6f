//! Utility functions and helpers.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::error::{AppError, Result};

/// Everything that cannot be part of a plain decimal number.
static NON_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9.\-]").expect("valid amount pattern"));

/// Parse a source-formatted amount such as `"$1,234.50"` or `"-$12.3"`.
///
/// Currency symbols, thousands separators and whitespace are discarded before
/// parsing. `field` only labels the error.
pub fn parse_amount(field: &str, raw: &str) -> Result<Decimal> {
    let cleaned = NON_NUMERIC.replace_all(raw, "");
    Decimal::from_str(&cleaned).map_err(|_| AppError::parse(field, raw))
}

/// `value` rounded and padded to exactly two decimal places.
pub fn two_places(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp(2);
    rounded.rescale(2);
    rounded
}

/// Collapse runs of whitespace (including newlines from table cells).
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
