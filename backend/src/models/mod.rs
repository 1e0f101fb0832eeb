//! Domain models for the roster reconciliation pipeline.
//!
//! - [`NationalId`] - The 11-digit merge key
//! - [`EmployeeSnapshot`] - One employee as seen in a parsed spreadsheet
//! - [`PersistedEmployee`] - One row of the employee registry

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// National ID
// =============================================================================

/// Number of digits in a cleaned national ID.
pub const NATIONAL_ID_LEN: usize = 11;

/// An 11-digit national identifier, the key shared by snapshot and registry.
///
/// Only constructible from a string of exactly [`NATIONAL_ID_LEN`] ASCII
/// digits. Use [`crate::normalize::clean_national_id`] for raw cell values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NationalId(String);

impl NationalId {
    pub fn new(digits: impl Into<String>) -> Option<Self> {
        let digits = digits.into();
        if digits.len() == NATIONAL_ID_LEN && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(digits))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NationalId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NationalId::new(value.clone()).ok_or_else(|| format!("invalid national id '{}'", value))
    }
}

impl From<NationalId> for String {
    fn from(id: NationalId) -> Self {
        id.0
    }
}

impl fmt::Display for NationalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Snapshot Record
// =============================================================================

/// An employee as extracted from one roster spreadsheet row.
///
/// Immutable once produced by the snapshot parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeSnapshot {
    pub national_id: NationalId,
    /// Uppercased, trimmed full name.
    pub name: String,
    /// Job title exactly as it appeared in the cell.
    pub job_title_raw: Option<String>,
    /// Uppercased, trimmed, whitespace-collapsed job title.
    pub job_title: Option<String>,
    pub admission_date: Option<NaiveDate>,
    /// Classification code derived from the normalized title.
    pub classification: String,
    /// Executing-function derived from the title (lookup or first-word fallback).
    pub executing_function: Option<String>,
    pub hours_worked: u32,
    /// Company header the row was found under.
    pub company: String,
    /// Company tax ID, empty when the company is not in the lookup tables.
    pub tax_id: String,
    pub matricula: String,
    /// Full cost-center string, trimmed.
    pub cost_center: String,
    /// Project guessed from the cost center.
    pub project_guess: String,
    /// Situation code as given in the sheet.
    pub situation_code: String,
    pub situation_label: String,
    pub processed_at: DateTime<Utc>,
    /// Zero-based row index in the source grid.
    pub source_row: usize,
}

// =============================================================================
// Registry Record
// =============================================================================

/// A row of the employee registry.
///
/// `project`, `team`, `coordinator`, `supervisor` and `team_lead` are curated
/// by people editing the registry directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEmployee {
    pub national_id: NationalId,
    pub name: String,
    pub job_title: Option<String>,
    pub admission_date: Option<NaiveDate>,
    pub project: String,
    pub team: String,
    pub coordinator: String,
    pub supervisor: String,
    pub team_lead: String,
    pub hours_worked: u32,
    pub executing_function: Option<String>,
    pub classification: String,
    pub tax_id: String,
    pub company: String,
    pub matricula: String,
    pub cost_center: String,
    pub situation_code: String,
    pub situation_label: String,
    pub updated_at: DateTime<Utc>,
}

impl PersistedEmployee {
    /// The human-curated fields, in a comparable form.
    pub fn curated(&self) -> CuratedFields<'_> {
        CuratedFields {
            project: &self.project,
            team: &self.team,
            coordinator: &self.coordinator,
            supervisor: &self.supervisor,
            team_lead: &self.team_lead,
        }
    }
}

/// Borrowed view of the curated fields of a registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuratedFields<'a> {
    pub project: &'a str,
    pub team: &'a str,
    pub coordinator: &'a str,
    pub supervisor: &'a str,
    pub team_lead: &'a str,
}

// =============================================================================
// Tests
// =============================================================================
