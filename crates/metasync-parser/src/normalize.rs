use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::coerce::{clean_optional, coerce_target, parse_date, parse_decimal, parse_identifier};
use crate::decode::decode_payload;
use crate::errors::NormalizeError;
use crate::model::{Column, DropReason, DroppedRow, GoalRecord, KeyScheme, NormalizedSheet};

/// Decodes, validates and coerces a raw sheet payload.
pub fn normalize_payload(
    payload: &[u8],
    scheme: KeyScheme,
) -> Result<NormalizedSheet, NormalizeError> {
    let text = decode_payload(payload)?;
    normalize_text(&text, scheme)
}

/// Same as [`normalize_payload`] for text that is already decoded.
pub fn normalize_text(text: &str, scheme: KeyScheme) -> Result<NormalizedSheet, NormalizeError> {
    if text.trim().is_empty() {
        return Err(NormalizeError::EmptyPayload);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let layout = ColumnLayout::resolve(&headers, scheme)?;
    debug!(?layout, %scheme, "resolved sheet columns");

    let mut sheet = NormalizedSheet::default();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        // Header is line 1; fall back to counting when the reader has no position.
        let line = record
            .position()
            .map(|pos| pos.line())
            .unwrap_or(index as u64 + 2);
        sheet.total_rows += 1;

        match layout.build_record(&record, line) {
            Ok(goal) => sheet.records.push(goal),
            Err(reason) => {
                warn!(line, %reason, "dropping sheet row");
                sheet.dropped.push(DroppedRow { line, reason });
            }
        }
    }

    Ok(sheet)
}

/// Positions of the understood columns within the header row.
#[derive(Debug)]
struct ColumnLayout {
    scheme: KeyScheme,
    id: Option<usize>,
    cooperativa: usize,
    meta: usize,
    data: usize,
    status: usize,
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord, scheme: KeyScheme) -> Result<Self, NormalizeError> {
        let labels: Vec<String> = headers
            .iter()
            .map(|label| label.trim().to_uppercase())
            .collect();
        let position = |column: Column| labels.iter().position(|label| label == column.label());

        let missing: Vec<String> = scheme
            .required_columns()
            .iter()
            .filter(|column| position(**column).is_none())
            .map(|column| column.label().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(NormalizeError::MissingColumns { missing });
        }

        let required = |column: Column| {
            position(column).ok_or_else(|| NormalizeError::MissingColumns {
                missing: vec![column.label().to_string()],
            })
        };

        Ok(Self {
            scheme,
            id: match scheme {
                KeyScheme::Identifier => Some(required(Column::Id)?),
                KeyScheme::Surrogate => None,
            },
            cooperativa: required(Column::Cooperativa)?,
            meta: required(Column::Meta)?,
            data: required(Column::Data)?,
            status: required(Column::Status)?,
        })
    }

    fn build_record(&self, record: &StringRecord, line: u64) -> Result<GoalRecord, DropReason> {
        let field = |index: usize| record.get(index).unwrap_or_default();

        let cooperative =
            clean_optional(field(self.cooperativa)).ok_or(DropReason::MissingCooperative)?;

        let id = match self.id {
            Some(index) => Some(parse_identifier(field(index))?),
            None => None,
        };

        let raw_date = field(self.data);
        let date = parse_date(raw_date);
        if date.is_none() {
            match (self.scheme, raw_date.trim()) {
                (KeyScheme::Surrogate, "") => return Err(DropReason::MissingDate),
                (KeyScheme::Surrogate, raw) => return Err(DropReason::InvalidDate(raw.to_string())),
                (KeyScheme::Identifier, "") => {}
                (KeyScheme::Identifier, raw) => {
                    warn!(line, value = raw, "unparseable date stored as NULL");
                }
            }
        }

        let raw_target = field(self.meta);
        let parsed_target = parse_decimal(raw_target);
        if parsed_target.is_none() && !raw_target.trim().is_empty() {
            warn!(line, value = raw_target.trim(), "unparseable target coerced to zero");
        }
        let target = coerce_target(parsed_target, self.scheme);

        let status = clean_optional(field(self.status))
            .or_else(|| self.scheme.default_status().map(str::to_string));

        Ok(GoalRecord {
            id,
            cooperative,
            target,
            date,
            status,
        })
    }
}
