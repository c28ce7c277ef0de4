use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::model::{DropReason, KeyScheme};

// Day-first on purpose: the sheet is filled in pt-BR, so `01/02/2024` is 1 February.
static DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%Y/%m/%d", "%d/%m/%y",
];
static TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

pub(crate) fn clean_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn parse_identifier(value: &str) -> Result<i32, DropReason> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DropReason::MissingIdentifier);
    }
    if let Ok(id) = trimmed.parse::<i32>() {
        return Ok(id);
    }

    // Spreadsheet exports sometimes render integer ids as "7.0".
    Decimal::from_str(trimmed)
        .ok()
        .filter(|value| value.fract().is_zero())
        .and_then(|value| value.to_i32())
        .ok_or_else(|| DropReason::InvalidIdentifier(trimmed.to_string()))
}

/// Parses a numeric cell. A lone comma is read as the decimal separator
/// (`12,5`); with both separators present the last one wins (`1.234,56`).
pub(crate) fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }

    let canonical = match (trimmed.rfind(','), trimmed.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => trimmed.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => trimmed.replace(',', ""),
        (Some(_), None) => trimmed.replace(',', "."),
        _ => trimmed.to_string(),
    };

    Decimal::from_str(&canonical).ok()
}

/// Applies the scheme's target rules: integers are truncated toward zero and
/// must fit the `INT` column, anything unusable becomes zero.
pub(crate) fn coerce_target(parsed: Option<Decimal>, scheme: KeyScheme) -> Decimal {
    let Some(value) = parsed else {
        return Decimal::ZERO;
    };

    match scheme {
        KeyScheme::Identifier => {
            // normalize() also folds the -0 left by truncating (-1, 0).
            let truncated = value.trunc().normalize();
            if truncated.to_i32().is_some() {
                truncated
            } else {
                Decimal::ZERO
            }
        }
        KeyScheme::Surrogate => value,
    }
}

/// Parses a calendar date, day-first for slash/dash/dot forms. A trailing
/// time of day is accepted and discarded.
pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (date_part, time_part) = match trimmed.find(|c: char| c == ' ' || c == 'T') {
        Some(split) => (&trimmed[..split], Some(trimmed[split + 1..].trim())),
        None => (trimmed, None),
    };

    if let Some(time) = time_part {
        let valid_time = TIME_FORMATS
            .iter()
            .any(|fmt| NaiveTime::parse_from_str(time, fmt).is_ok());
        if !valid_time {
            return None;
        }
    }

    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .find(|date| (1900..=2999).contains(&date.year()))
}
