//! Position record data structures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single observed row of the positions table.
///
/// Every field keeps the source formatting (currency symbols, thousands
/// separators). Numeric comparisons go through [`crate::utils::parse_amount`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionRecord {
    /// Symbol plus leverage, e.g. "BTC 10.00x"
    pub token: String,

    /// Position size
    pub size: String,

    /// Net value
    pub net_value: String,

    /// Posted collateral
    pub collateral: String,

    /// Entry price
    pub entry_price: String,

    /// Current mark price
    pub mark_price: String,

    /// Liquidation price
    pub liquidation_price: String,
}

impl PositionRecord {
    /// Read a field by column.
    pub fn field(&self, field: RecordField) -> &str {
        match field {
            RecordField::Token => &self.token,
            RecordField::Size => &self.size,
            RecordField::NetValue => &self.net_value,
            RecordField::Collateral => &self.collateral,
            RecordField::EntryPrice => &self.entry_price,
            RecordField::MarkPrice => &self.mark_price,
            RecordField::LiquidationPrice => &self.liquidation_price,
        }
    }

    /// A record is well formed when it names a token and no column is blank.
    pub fn is_well_formed(&self) -> bool {
        RecordField::ALL
            .iter()
            .all(|f| !self.field(*f).trim().is_empty())
    }
}

impl fmt::Display for PositionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (size {}, entry {}, liq. {})",
            self.token, self.size, self.entry_price, self.liquidation_price
        )
    }
}

/// Last accepted records for one target, in page order.
pub type Snapshot = Vec<PositionRecord>;

/// Columns of a [`PositionRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Token,
    Size,
    NetValue,
    Collateral,
    EntryPrice,
    MarkPrice,
    LiquidationPrice,
}

impl RecordField {
    /// All columns in table order.
    pub const ALL: [RecordField; 7] = [
        RecordField::Token,
        RecordField::Size,
        RecordField::NetValue,
        RecordField::Collateral,
        RecordField::EntryPrice,
        RecordField::MarkPrice,
        RecordField::LiquidationPrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordField::Token => "token",
            RecordField::Size => "size",
            RecordField::NetValue => "net value",
            RecordField::Collateral => "collateral",
            RecordField::EntryPrice => "entry price",
            RecordField::MarkPrice => "mark price",
            RecordField::LiquidationPrice => "liquidation price",
        }
    }
}

impl fmt::Display for RecordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How records are matched between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKey {
    /// Token label (symbol + leverage)
    Token,
    /// Entry price canonicalized to two decimals
    #[default]
    EntryPrice,
}

/// Classification of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// At least one well-formed record
    Success,
    /// The page positively reported zero open positions
    Empty,
    /// Every attempt failed or timed out
    Failure,
}

/// Per-target result of one cycle's extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub status: PollStatus,
    pub records: Option<Vec<PositionRecord>>,
}

impl PollOutcome {
    /// Classify a well-formed record list.
    pub fn from_records(records: Vec<PositionRecord>) -> Self {
        let status = if records.is_empty() {
            PollStatus::Empty
        } else {
            PollStatus::Success
        };
        Self {
            status,
            records: Some(records),
        }
    }

    pub fn failure() -> Self {
        Self {
            status: PollStatus::Failure,
            records: None,
        }
    }
}
