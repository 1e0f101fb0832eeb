//! Field normalization helpers.
//!
//! Stateless conversions applied to raw cell values before a snapshot record
//! is built. Lookup-backed derivations take the [`LookupTables`] explicitly.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::lookups::LookupTables;
use crate::models::{NationalId, NATIONAL_ID_LEN};

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").expect("valid regex"));
static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Days between the spreadsheet epoch (1899-12-30) and 1970-01-01.
const SERIAL_UNIX_EPOCH: f64 = 25569.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;
const HALF_DAY_MILLIS: f64 = 43_200_000.0;

/// Strip everything but digits and left-pad with zeros to 11 digits.
///
/// Returns `None` when no digits are present or more than 11 remain.
pub fn clean_national_id(raw: &str) -> Option<NationalId> {
    let digits = NON_DIGITS.replace_all(raw, "");
    if digits.is_empty() || digits.len() > NATIONAL_ID_LEN {
        return None;
    }
    NationalId::new(format!("{:0>width$}", digits, width = NATIONAL_ID_LEN))
}

/// Uppercase, trim and collapse internal whitespace runs to one space.
pub fn normalize_job_title(raw: &str) -> Option<String> {
    let upper = raw.to_uppercase();
    let collapsed = WHITESPACE_RUNS.replace_all(upper.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// Classification code for a title; unmapped or missing titles get the
/// generic code from the tables.
pub fn derive_classification(tables: &LookupTables, normalized_title: Option<&str>) -> String {
    normalized_title
        .and_then(|t| tables.classification(t))
        .unwrap_or(tables.other_classification())
        .to_string()
}

/// Executing-function for a title.
///
/// Exact lookup on the normalized title first, then the first word of the
/// raw title, uppercased.
pub fn derive_executing_function(
    tables: &LookupTables,
    normalized_title: Option<&str>,
    raw_title: Option<&str>,
) -> Option<String> {
    if let Some(mapped) = normalized_title.and_then(|t| tables.executing_function(t)) {
        return Some(mapped.to_string());
    }
    raw_title
        .and_then(|t| t.split_whitespace().next())
        .map(|word| word.to_uppercase())
}

/// Company prefix followed by the employee code padded to four digits.
pub fn synthesize_matricula(prefix: &str, code: u64) -> String {
    format!("{}{:04}", prefix, code)
}

/// Project guess from a cost-center string: everything before the first
/// `A`. When `A` is missing or is the first character, the whole string.
pub fn project_from_cost_center(cost_center: &str) -> String {
    match cost_center.find('A') {
        Some(pos) if pos > 0 => cost_center[..pos].to_string(),
        _ => cost_center.to_string(),
    }
}

/// Convert a spreadsheet date serial to a calendar date.
///
/// Half a day is added before truncating so serials stored as midnight in a
/// negative UTC offset do not land on the previous day.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let millis = (serial - SERIAL_UNIX_EPOCH) * MILLIS_PER_DAY + HALF_DAY_MILLIS;
    DateTime::from_timestamp_millis(millis.floor() as i64).map(|dt| dt.date_naive())
}

/// Leading integer of a string, ignoring leading whitespace and anything
/// after the digits (`" 42abc"` is 42, `"abc"` is nothing).
pub fn leading_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = rest
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let value: i64 = rest[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}
