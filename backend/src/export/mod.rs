//! Tabular export of employee records.
//!
//! One fixed column order for every export, written as xlsx or csv.

use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::path::Path;

use crate::error::{ExportError, ExportResult};
use crate::models::PersistedEmployee;

/// Worksheet name of xlsx exports.
pub const SHEET_NAME: &str = "Colaboradores";

/// Column headers and xlsx widths, in export order.
pub const COLUMNS: [(&str, f64); 18] = [
    ("NOME", 35.0),
    ("FUNCAO", 30.0),
    ("CPF", 14.0),
    ("MATRICULA", 12.0),
    ("EMPRESA", 35.0),
    ("CNPJ", 18.0),
    ("DATA_ADMISSAO", 12.0),
    ("PROJETO", 8.0),
    ("PROJETO_RH", 25.0),
    ("SITUACAO", 10.0),
    ("SITUACAO_TIPO", 45.0),
    ("EQUIPE", 15.0),
    ("COORDENADOR", 25.0),
    ("SUPERVISOR", 25.0),
    ("HORAS_TRABALHADAS", 8.0),
    ("FUNCAO_EXECUTANTE", 20.0),
    ("CLASSE", 8.0),
    ("NOME_LIDER", 25.0),
];

/// One export line. Field order matches [`COLUMNS`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "NOME")]
    pub name: String,
    #[serde(rename = "FUNCAO")]
    pub job_title: String,
    #[serde(rename = "CPF")]
    pub national_id: String,
    #[serde(rename = "MATRICULA")]
    pub matricula: String,
    #[serde(rename = "EMPRESA")]
    pub company: String,
    #[serde(rename = "CNPJ")]
    pub tax_id: String,
    /// `dd/mm/yyyy`, empty when unknown.
    #[serde(rename = "DATA_ADMISSAO")]
    pub admission_date: String,
    #[serde(rename = "PROJETO")]
    pub project: String,
    #[serde(rename = "PROJETO_RH")]
    pub cost_center: String,
    #[serde(rename = "SITUACAO")]
    pub situation_code: String,
    #[serde(rename = "SITUACAO_TIPO")]
    pub situation_label: String,
    #[serde(rename = "EQUIPE")]
    pub team: String,
    #[serde(rename = "COORDENADOR")]
    pub coordinator: String,
    #[serde(rename = "SUPERVISOR")]
    pub supervisor: String,
    #[serde(rename = "HORAS_TRABALHADAS")]
    pub hours_worked: u32,
    #[serde(rename = "FUNCAO_EXECUTANTE")]
    pub executing_function: String,
    #[serde(rename = "CLASSE")]
    pub classification: String,
    #[serde(rename = "NOME_LIDER")]
    pub team_lead: String,
}

impl From<&PersistedEmployee> for ExportRow {
    fn from(e: &PersistedEmployee) -> Self {
        Self {
            name: e.name.clone(),
            job_title: e.job_title.clone().unwrap_or_default(),
            national_id: e.national_id.to_string(),
            matricula: e.matricula.clone(),
            company: e.company.clone(),
            tax_id: e.tax_id.clone(),
            admission_date: e
                .admission_date
                .map(|d| d.format("%d/%m/%Y").to_string())
                .unwrap_or_default(),
            project: e.project.clone(),
            cost_center: e.cost_center.clone(),
            situation_code: e.situation_code.clone(),
            situation_label: e.situation_label.clone(),
            team: e.team.clone(),
            coordinator: e.coordinator.clone(),
            supervisor: e.supervisor.clone(),
            hours_worked: e.hours_worked,
            executing_function: e.executing_function.clone().unwrap_or_default(),
            classification: e.classification.clone(),
            team_lead: e.team_lead.clone(),
        }
    }
}

impl ExportRow {
    /// Text cells in column order; `None` marks the numeric hours column.
    fn text_cells(&self) -> [Option<&str>; 18] {
        [
            Some(&self.name),
            Some(&self.job_title),
            Some(&self.national_id),
            Some(&self.matricula),
            Some(&self.company),
            Some(&self.tax_id),
            Some(&self.admission_date),
            Some(&self.project),
            Some(&self.cost_center),
            Some(&self.situation_code),
            Some(&self.situation_label),
            Some(&self.team),
            Some(&self.coordinator),
            Some(&self.supervisor),
            None,
            Some(&self.executing_function),
            Some(&self.classification),
            Some(&self.team_lead),
        ]
    }
}

/// Project registry rows into export rows.
pub fn rows_from<'a>(employees: impl IntoIterator<Item = &'a PersistedEmployee>) -> Vec<ExportRow> {
    employees.into_iter().map(ExportRow::from).collect()
}

// =============================================================================
// Writers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> ExportResult<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("xlsx") => Ok(ExportFormat::Xlsx),
            Some("csv") => Ok(ExportFormat::Csv),
            _ => Err(ExportError::UnsupportedFormat(path.display().to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

/// Render rows as an xlsx workbook with a bold header row.
pub fn to_xlsx_bytes(rows: &[ExportRow]) -> ExportResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let header_format = Format::new().set_bold();
    for (col, (title, width)) in COLUMNS.iter().enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *title, &header_format)?;
        sheet.set_column_width(col, *width)?;
    }

    for (idx, row) in rows.iter().enumerate() {
        let r = idx as u32 + 1;
        for (col, cell) in row.text_cells().iter().enumerate() {
            match cell {
                Some(text) => sheet.write_string(r, col as u16, *text)?,
                None => sheet.write_number(r, col as u16, f64::from(row.hours_worked))?,
            };
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Render rows as `;`-separated csv with a header line.
pub fn to_csv_bytes(rows: &[ExportRow]) -> ExportResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(COLUMNS.iter().map(|(title, _)| *title))?;
    for row in rows {
        writer.serialize(row)?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

pub fn to_bytes(rows: &[ExportRow], format: ExportFormat) -> ExportResult<Vec<u8>> {
    match format {
        ExportFormat::Xlsx => to_xlsx_bytes(rows),
        ExportFormat::Csv => to_csv_bytes(rows),
    }
}

/// Write rows to `path`; the extension picks the format.
pub fn write_file(path: &Path, rows: &[ExportRow]) -> ExportResult<()> {
    let bytes = to_bytes(rows, ExportFormat::from_path(path)?)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Download file name stamped with the export time.
pub fn file_name(prefix: &str, at: DateTime<Utc>, format: ExportFormat) -> String {
    format!("{}_{}.{}", prefix, at.format("%Y-%m-%d_%H%M"), format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{read_workbook_bytes, Cell};
    use crate::reconcile::insert_from_snapshot;
    use crate::reconcile::tests::snap;
    use chrono::{NaiveDate, TimeZone};

    fn employee() -> PersistedEmployee {
        let mut e = insert_from_snapshot(&snap(42));
        e.admission_date = NaiveDate::from_ymd_opt(2021, 7, 5);
        e.team_lead = "ROBERTO".into();
        e.executing_function = None;
        e
    }

    #[test]
    fn test_row_projection() {
        let row = ExportRow::from(&employee());
        assert_eq!(row.national_id, "00000000042");
        assert_eq!(row.admission_date, "05/07/2021");
        assert_eq!(row.executing_function, "");
        assert_eq!(row.team_lead, "ROBERTO");
        assert_eq!(row.cost_center, "1020A3");
    }

    #[test]
    fn test_csv_header_and_order() {
        let bytes = to_csv_bytes(&rows_from([&employee()])).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();

        let header: Vec<_> = lines.next().unwrap().split(';').collect();
        let expected: Vec<_> = COLUMNS.iter().map(|(t, _)| *t).collect();
        assert_eq!(header, expected);

        let fields: Vec<_> = lines.next().unwrap().split(';').collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(fields[0], "EMPLOYEE 42");
        assert_eq!(fields[6], "05/07/2021");
        assert_eq!(fields[14], "8");
        assert_eq!(fields[17], "ROBERTO");
    }

    #[test]
    fn test_xlsx_layout() {
        let bytes = to_xlsx_bytes(&rows_from([&employee()])).unwrap();
        let grid = read_workbook_bytes(bytes).unwrap();

        assert_eq!(grid.sheet, SHEET_NAME);
        assert_eq!(grid.cell(0, 0), &Cell::Text("NOME".into()));
        assert_eq!(grid.cell(0, 17), &Cell::Text("NOME_LIDER".into()));
        assert_eq!(grid.cell(1, 2), &Cell::Text("00000000042".into()));
        assert_eq!(grid.cell(1, 14), &Cell::Number(8.0));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out.XLSX")).unwrap(), ExportFormat::Xlsx);
        assert_eq!(ExportFormat::from_path(Path::new("out.csv")).unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::from_path(Path::new("out.json")).is_err());
    }

    #[test]
    fn test_write_file_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.csv");
        write_file(&path, &rows_from([&employee()])).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("NOME;FUNCAO"));

        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, 5, 0).unwrap();
        assert_eq!(
            file_name("colaboradores", at, ExportFormat::Xlsx),
            "colaboradores_2026-10-16_0905.xlsx"
        );
    }
}
