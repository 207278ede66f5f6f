//! Change detection between two position snapshots.
//!
//! Computes every structural difference (positions opened or closed) and,
//! for positions present on both sides, every value change at or above the
//! configured threshold. The comparison never stops at the first difference.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{ComparisonKey, MonitorConfig, PositionRecord, RecordField};
use crate::utils::{parse_amount, two_places};

/// Kind of a detected change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Removed,
    ThresholdExceeded,
    Unparseable,
}

/// One reason a snapshot is considered changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReason {
    pub kind: ChangeKind,
    /// Comparison key of the position concerned
    pub subject_key: String,
    pub detail: String,
    /// Offending record for `Added` / `Removed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<PositionRecord>,
}

impl ChangeReason {
    /// One-line summary used as the alert status.
    pub fn summary(&self) -> String {
        match self.kind {
            ChangeKind::Added => {
                let token = self.record.as_ref().map_or("?", |r| r.token.as_str());
                format!(
                    "*New position added*: {} at entry price {}",
                    token,
                    self.record.as_ref().map_or("?", |r| r.entry_price.as_str())
                )
            }
            ChangeKind::Removed => {
                let token = self.record.as_ref().map_or("?", |r| r.token.as_str());
                format!(
                    "*Position closed*: {} at entry price {}",
                    token,
                    self.record.as_ref().map_or("?", |r| r.entry_price.as_str())
                )
            }
            ChangeKind::ThresholdExceeded => {
                format!("*Position changed*: {} {}", self.subject_key, self.detail)
            }
            ChangeKind::Unparseable => {
                format!("*Unreadable value*: {} {}", self.subject_key, self.detail)
            }
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}: {}", self.kind, self.subject_key, self.detail)
    }
}

/// Structured verdict of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeResult {
    pub changed: bool,
    pub reasons: Vec<ChangeReason>,
}

impl ChangeResult {
    fn from_reasons(reasons: Vec<ChangeReason>) -> Self {
        Self {
            changed: !reasons.is_empty(),
            reasons,
        }
    }

    /// Number of reasons of the given kind.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.reasons.iter().filter(|r| r.kind == kind).count()
    }

    /// Status line for an alert.
    pub fn summary(&self) -> String {
        self.reasons
            .iter()
            .map(ChangeReason::summary)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Relative value check applied to positions present in both snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueComparator {
    /// Inclusive lower bound, in percent
    pub threshold_percent: Decimal,
    pub field: RecordField,
}

/// Pure comparison of a stored snapshot against freshly extracted records.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDetector {
    key: ComparisonKey,
    comparator: Option<ValueComparator>,
}

impl ChangeDetector {
    /// Detector that only reports opened and closed positions.
    pub fn new(key: ComparisonKey) -> Self {
        Self {
            key,
            comparator: None,
        }
    }

    /// Also compare `field` of shared positions against a threshold.
    ///
    /// The threshold is taken at its shortest decimal form, so `0.1` means
    /// exactly one tenth of a percent. A threshold too large for a decimal
    /// never fires.
    pub fn with_comparator(mut self, threshold_percent: f64, field: RecordField) -> Self {
        let threshold_percent =
            Decimal::from_str(&threshold_percent.to_string()).unwrap_or(Decimal::MAX);
        self.comparator = Some(ValueComparator {
            threshold_percent,
            field,
        });
        self
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        let detector = Self::new(config.comparison_key);
        if config.compare_values {
            detector.with_comparator(config.threshold_percent, config.compare_field)
        } else {
            detector
        }
    }

    /// Comparison key of a record.
    pub fn key_of(&self, record: &PositionRecord) -> String {
        match self.key {
            ComparisonKey::Token => record.token.trim().to_string(),
            ComparisonKey::EntryPrice => match parse_amount("entry price", &record.entry_price) {
                Ok(price) => two_places(price).to_string(),
                Err(_) => record.entry_price.trim().to_string(),
            },
        }
    }

    /// Compare `previous` against `current`.
    pub fn compare(&self, previous: &[PositionRecord], current: &[PositionRecord]) -> ChangeResult {
        let prev_keyed = self.keyed(previous);
        let curr_keyed = self.keyed(current);

        let prev_map: HashMap<&str, &PositionRecord> =
            prev_keyed.iter().map(|(k, r)| (k.as_str(), *r)).collect();
        let curr_map: HashMap<&str, &PositionRecord> =
            curr_keyed.iter().map(|(k, r)| (k.as_str(), *r)).collect();

        let mut reasons = Vec::new();

        // Added: in current but not in previous
        for (key, record) in &curr_keyed {
            if !prev_map.contains_key(key.as_str()) {
                reasons.push(ChangeReason {
                    kind: ChangeKind::Added,
                    subject_key: key.clone(),
                    detail: record.to_string(),
                    record: Some((*record).clone()),
                });
            }
        }

        // Removed: in previous but not in current
        for (key, record) in &prev_keyed {
            if !curr_map.contains_key(key.as_str()) {
                reasons.push(ChangeReason {
                    kind: ChangeKind::Removed,
                    subject_key: key.clone(),
                    detail: record.to_string(),
                    record: Some((*record).clone()),
                });
            }
        }

        if let Some(comparator) = &self.comparator {
            for (key, curr) in &curr_keyed {
                if let Some(prev) = prev_map.get(key.as_str()) {
                    if let Some(reason) = Self::compare_values(comparator, key, prev, curr) {
                        reasons.push(reason);
                    }
                }
            }
        }

        ChangeResult::from_reasons(reasons)
    }

    /// Keys in page order, first occurrence of a duplicated key wins.
    fn keyed<'a>(&self, records: &'a [PositionRecord]) -> Vec<(String, &'a PositionRecord)> {
        let mut seen = HashSet::new();
        records
            .iter()
            .filter_map(|r| {
                let key = self.key_of(r);
                seen.insert(key.clone()).then_some((key, r))
            })
            .collect()
    }

    fn compare_values(
        comparator: &ValueComparator,
        key: &str,
        prev: &PositionRecord,
        curr: &PositionRecord,
    ) -> Option<ChangeReason> {
        let field = comparator.field;
        let prev_raw = prev.field(field);
        let curr_raw = curr.field(field);
        if prev_raw == curr_raw {
            return None;
        }

        let unparseable = |detail: String| ChangeReason {
            kind: ChangeKind::Unparseable,
            subject_key: key.to_string(),
            detail,
            record: None,
        };

        let (prev_value, curr_value) = match (
            parse_amount(field.as_str(), prev_raw),
            parse_amount(field.as_str(), curr_raw),
        ) {
            (Ok(p), Ok(c)) => (p, c),
            (Err(e), _) | (_, Err(e)) => return Some(unparseable(e.to_string())),
        };

        if prev_value == curr_value {
            return None;
        }
        if prev_value.is_zero() {
            return Some(unparseable(format!(
                "{} moved from a zero baseline to {}",
                field, curr_raw
            )));
        }

        let Some(delta_percent) = (curr_value - prev_value)
            .abs()
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.checked_div(prev_value.abs()))
        else {
            return Some(unparseable(format!(
                "{} change {} -> {} is out of range",
                field, prev_raw, curr_raw
            )));
        };

        (delta_percent >= comparator.threshold_percent).then(|| ChangeReason {
            kind: ChangeKind::ThresholdExceeded,
            subject_key: key.to_string(),
            detail: format!(
                "{} {} -> {} ({}{}%)",
                field,
                prev_raw,
                curr_raw,
                if curr_value > prev_value { "+" } else { "-" },
                two_places(delta_percent)
            ),
            record: None,
        })
    }
}
