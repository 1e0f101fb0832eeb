//! Snapshot parser: cell grid to employee snapshot records.
//!
//! The roster export is a flat sheet where company header rows introduce
//! blocks of employee rows:
//!
//! ```text
//! row  col0                      col4           col11         ...  col28
//! 0    LARSIL FLORESTAL LTDA
//! 1    17                        JOSE SILVA     MOTORISTA          123.456.789-01
//! 2    18                        ANA SOUZA      AJUDANTE           98765432100
//! 3    S5 FLORESTAL LTDA
//! 4    3                         ...
//! ```
//!
//! Rows are scanned top to bottom with the most recent company header as
//! context. Rows that cannot become a record are skipped and reported, never
//! fatal.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

use crate::api::logs::log_warning;
use crate::clock::Clock;
use crate::lookups::LookupTables;
use crate::models::EmployeeSnapshot;
use crate::normalize::{
    clean_national_id, derive_classification, derive_executing_function, leading_integer,
    normalize_job_title, project_from_cost_center, serial_to_date, synthesize_matricula,
};
use crate::parser::{Cell, Grid};

/// Minimum length (exclusive) of a company header cell.
const COMPANY_HEADER_MIN_LEN: usize = 10;
const COMPANY_HEADER_MARKER: &str = "LTDA";

// =============================================================================
// Column layout
// =============================================================================

/// Fixed column positions of the source system's export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnLayout {
    pub code: usize,
    pub name: usize,
    pub job_title: usize,
    pub cost_center: usize,
    pub admission_date: usize,
    pub situation: usize,
    pub national_id: usize,
}

impl ColumnLayout {
    /// Layout of the current export format.
    pub const V1: ColumnLayout = ColumnLayout {
        code: 0,
        name: 4,
        job_title: 11,
        cost_center: 18,
        admission_date: 22,
        situation: 26,
        national_id: 28,
    };
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self::V1
    }
}

// =============================================================================
// Report
// =============================================================================

/// Why a row produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SkipReason {
    /// Employee row before any company header.
    NoCompany,
    MissingName,
    MissingNationalId,
    /// National ID with no digits or more than 11 digits.
    InvalidNationalId { value: String },
    Terminated,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCompany => write!(f, "no company header above this row"),
            SkipReason::MissingName => write!(f, "missing name"),
            SkipReason::MissingNationalId => write!(f, "missing national ID"),
            SkipReason::InvalidNationalId { value } => {
                write!(f, "national ID '{}' is not 11 digits", value)
            }
            SkipReason::Terminated => write!(f, "terminated"),
        }
    }
}

/// An employee row that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub row: usize,
    pub code: i64,
    pub reason: SkipReason,
}

/// What happened during one parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReport {
    pub sheet: String,
    pub rows_scanned: usize,
    /// Company headers in first-seen order.
    pub companies: Vec<String>,
    pub skipped: Vec<SkippedRow>,
    /// Company headers with no lookup entry.
    pub unknown_companies: Vec<String>,
    /// Normalized titles with no classification entry.
    pub unmapped_titles: Vec<String>,
}

impl SnapshotReport {
    pub fn terminated_count(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.reason == SkipReason::Terminated)
            .count()
    }
}

/// Records plus the report of the parse that produced them.
#[derive(Debug, Clone, Default)]
pub struct ParsedSnapshot {
    pub records: Vec<EmployeeSnapshot>,
    pub report: SnapshotReport,
}

// =============================================================================
// Parser
// =============================================================================

enum RowKind<'a> {
    CompanyHeader(&'a str),
    Employee(i64),
    Other,
}

/// Column 0 decides what a row is. Headers are checked first so a company
/// name that happens to start with digits is still a header.
fn classify_row(cell: &Cell) -> RowKind<'_> {
    match cell {
        Cell::Text(text) => {
            if text.chars().count() > COMPANY_HEADER_MIN_LEN
                && text.to_uppercase().contains(COMPANY_HEADER_MARKER)
            {
                RowKind::CompanyHeader(text)
            } else {
                match leading_integer(text) {
                    Some(code) if code > 0 => RowKind::Employee(code),
                    _ => RowKind::Other,
                }
            }
        }
        Cell::Number(n) if n.is_finite() && n.trunc() >= 1.0 => RowKind::Employee(n.trunc() as i64),
        _ => RowKind::Other,
    }
}

/// Parses roster grids against a set of lookup tables.
pub struct SnapshotParser<'a> {
    tables: &'a LookupTables,
    clock: &'a dyn Clock,
    layout: ColumnLayout,
}

impl<'a> SnapshotParser<'a> {
    pub fn new(tables: &'a LookupTables, clock: &'a dyn Clock) -> Self {
        Self {
            tables,
            clock,
            layout: ColumnLayout::V1,
        }
    }

    pub fn with_layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Scan the grid and build snapshot records in row order.
    pub fn parse(&self, grid: &Grid) -> ParsedSnapshot {
        let processed_at = self.clock.now();
        let mut records = Vec::new();
        let mut report = SnapshotReport {
            sheet: grid.sheet.clone(),
            ..Default::default()
        };
        let mut unknown_companies = HashSet::new();
        let mut unmapped_titles = HashSet::new();
        let mut current_company: Option<String> = None;

        for row in 0..grid.height() {
            report.rows_scanned += 1;
            let first = grid.cell(row, self.layout.code);
            if first.is_blank() {
                continue;
            }

            let code = match classify_row(first) {
                RowKind::CompanyHeader(text) => {
                    let company = text.trim().to_uppercase();
                    if !report.companies.contains(&company) {
                        report.companies.push(company.clone());
                    }
                    if self.tables.company(&company).is_none() && unknown_companies.insert(company.clone()) {
                        report.unknown_companies.push(company.clone());
                    }
                    current_company = Some(company);
                    continue;
                }
                RowKind::Employee(code) => code,
                RowKind::Other => continue,
            };

            let skip = |reason| SkippedRow { row, code, reason };

            let Some(company) = current_company.as_deref() else {
                report.skipped.push(skip(SkipReason::NoCompany));
                continue;
            };
            let Some(name) = text_at(grid, row, self.layout.name) else {
                report.skipped.push(skip(SkipReason::MissingName));
                continue;
            };
            let Some(raw_id) = text_at(grid, row, self.layout.national_id) else {
                report.skipped.push(skip(SkipReason::MissingNationalId));
                continue;
            };

            let situation_cell = grid.cell(row, self.layout.situation);
            let situation_code = situation_cell.as_text().map(|s| s.trim().to_string()).unwrap_or_default();
            let situation_num = leading_integer(&situation_code).and_then(|n| u32::try_from(n).ok());
            if situation_num.is_some_and(|n| self.tables.is_terminated(n)) {
                report.skipped.push(skip(SkipReason::Terminated));
                continue;
            }

            let Some(national_id) = clean_national_id(&raw_id) else {
                report.skipped.push(skip(SkipReason::InvalidNationalId { value: raw_id }));
                continue;
            };

            let job_title_raw = text_at(grid, row, self.layout.job_title);
            let job_title = job_title_raw.as_deref().and_then(normalize_job_title);
            if let Some(title) = job_title.as_deref() {
                if self.tables.classification(title).is_none() && unmapped_titles.insert(title.to_string()) {
                    report.unmapped_titles.push(title.to_string());
                }
            }

            let company_entry = self.tables.company(company);
            let prefix = company_entry
                .map(|c| c.prefix.as_str())
                .unwrap_or(self.tables.unknown_company_prefix());

            let cost_center_raw = text_at(grid, row, self.layout.cost_center).unwrap_or_default();

            records.push(EmployeeSnapshot {
                national_id,
                name: name.trim().to_uppercase(),
                classification: derive_classification(self.tables, job_title.as_deref()),
                executing_function: derive_executing_function(
                    self.tables,
                    job_title.as_deref(),
                    job_title_raw.as_deref(),
                ),
                job_title_raw,
                job_title,
                admission_date: admission_date(grid.cell(row, self.layout.admission_date)),
                hours_worked: self.tables.hours_worked(),
                company: company.to_string(),
                tax_id: company_entry.map(|c| c.tax_id.clone()).unwrap_or_default(),
                matricula: synthesize_matricula(prefix, code.unsigned_abs()),
                cost_center: cost_center_raw.trim().to_string(),
                project_guess: project_from_cost_center(&cost_center_raw),
                situation_label: situation_num
                    .and_then(|n| self.tables.situation_label(n))
                    .unwrap_or_default()
                    .to_string(),
                situation_code,
                processed_at,
                source_row: row,
            });
        }

        for company in &report.unknown_companies {
            log_warning(format!(
                "Company '{}' not in lookup tables; matricula prefix '{}' and empty tax ID used",
                company,
                self.tables.unknown_company_prefix()
            ));
        }
        for title in &report.unmapped_titles {
            log_warning(format!(
                "Job title '{}' has no classification; using '{}'",
                title,
                self.tables.other_classification()
            ));
        }

        ParsedSnapshot { records, report }
    }
}

/// Non-blank cell rendered as text.
fn text_at(grid: &Grid, row: usize, col: usize) -> Option<String> {
    grid.cell(row, col)
        .as_text()
        .filter(|s| !s.trim().is_empty())
}

fn admission_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Number(serial) => serial_to_date(*serial),
        Cell::Date(date) => Some(*date),
        _ => None,
    }
}
