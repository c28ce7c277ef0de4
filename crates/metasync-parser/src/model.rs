use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status stored for blank cells when the table uses a surrogate key.
pub const DEFAULT_STATUS: &str = "ATIVO";

/// How rows of the destination table are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// The sheet's `ID` column is the primary key; targets are integers.
    #[default]
    Identifier,
    /// A database-generated id plus `UNIQUE (cooperativa, data)`; targets
    /// are numeric.
    Surrogate,
}

impl KeyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScheme::Identifier => "identifier",
            KeyScheme::Surrogate => "surrogate",
        }
    }

    pub fn required_columns(&self) -> &'static [Column] {
        match self {
            KeyScheme::Identifier => &[
                Column::Id,
                Column::Cooperativa,
                Column::Meta,
                Column::Data,
                Column::Status,
            ],
            KeyScheme::Surrogate => &[
                Column::Cooperativa,
                Column::Meta,
                Column::Data,
                Column::Status,
            ],
        }
    }

    pub fn default_status(&self) -> Option<&'static str> {
        match self {
            KeyScheme::Identifier => None,
            KeyScheme::Surrogate => Some(DEFAULT_STATUS),
        }
    }
}

impl fmt::Display for KeyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "identifier" | "id" => Ok(KeyScheme::Identifier),
            "surrogate" | "composite" => Ok(KeyScheme::Surrogate),
            other => Err(format!(
                "unknown key scheme '{other}' (expected 'identifier' or 'surrogate')"
            )),
        }
    }
}

/// Sheet columns the pipeline understands, by their normalized label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Cooperativa,
    Meta,
    Data,
    Status,
}

impl Column {
    pub fn label(&self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::Cooperativa => "COOPERATIVA",
            Column::Meta => "META",
            Column::Data => "DATA",
            Column::Status => "STATUS",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A cooperative's target for a given date, ready to be upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalRecord {
    /// Sheet identifier; always `Some` under [`KeyScheme::Identifier`].
    pub id: Option<i32>,
    pub cooperative: String,
    pub target: Decimal,
    pub date: Option<NaiveDate>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "value", rename_all = "snake_case")]
pub enum DropReason {
    MissingCooperative,
    MissingIdentifier,
    InvalidIdentifier(String),
    MissingDate,
    InvalidDate(String),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::MissingCooperative => f.write_str("missing cooperative name"),
            DropReason::MissingIdentifier => f.write_str("missing identifier"),
            DropReason::InvalidIdentifier(raw) => write!(f, "invalid identifier '{raw}'"),
            DropReason::MissingDate => f.write_str("missing date"),
            DropReason::InvalidDate(raw) => write!(f, "invalid date '{raw}'"),
        }
    }
}

/// A source row excluded from the sync, with the CSV line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    pub line: u64,
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedSheet {
    pub records: Vec<GoalRecord>,
    pub total_rows: usize,
    pub dropped: Vec<DroppedRow>,
}

impl NormalizedSheet {
    pub fn valid_rows(&self) -> usize {
        self.records.len()
    }
}
