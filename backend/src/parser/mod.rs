//! Grid readers: turn an uploaded file into a rectangular cell grid.
//!
//! Workbooks (`.xlsx`, `.xls`, `.xlsb`, `.ods`) are read through calamine,
//! first worksheet only. CSV files go through encoding and delimiter
//! auto-detection before the `csv` crate splits them.
//!
//! The grid carries no roster semantics; see [`crate::snapshot`] for that.

mod xlsx;

use chrono::NaiveDate;
use std::path::Path;

use crate::error::{GridError, GridResult};

pub use xlsx::{read_workbook, read_workbook_bytes};

// =============================================================================
// Cells and grids
// =============================================================================

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Bool(bool),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl Cell {
    /// Blank text counts as empty.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// The cell rendered as text, `None` when blank.
    ///
    /// Integral numbers render without a decimal part so codes and IDs stored
    /// as numbers read back the way they were typed.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) if s.trim().is_empty() => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Date(d) => Some(d.format("%d/%m/%Y").to_string()),
            Cell::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// A rectangular grid of cells read from one worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    /// Worksheet name, or the file name for CSV input.
    pub sheet: String,
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    /// Build a grid, padding short rows so every row has the same width.
    pub fn new(sheet: impl Into<String>, mut rows: Vec<Vec<Cell>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, Cell::Empty);
        }
        Self {
            sheet: sheet.into(),
            rows,
        }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell at `(row, col)`; out-of-range positions read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }
}

// =============================================================================
// Format dispatch
// =============================================================================

/// Input file format, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridFormat {
    Workbook,
    Csv,
}

impl GridFormat {
    pub fn from_file_name(name: &str) -> GridResult<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(GridFormat::Workbook),
            "csv" | "txt" => Ok(GridFormat::Csv),
            _ => Err(GridError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// Read a grid from a file on disk.
pub fn read_grid(path: impl AsRef<Path>) -> GridResult<Grid> {
    let path = path.as_ref();
    let name = path.to_string_lossy();
    match GridFormat::from_file_name(&name)? {
        GridFormat::Workbook => read_workbook(path),
        GridFormat::Csv => {
            let bytes = std::fs::read(path)?;
            read_csv_bytes(&bytes, &display_name(&name))
        }
    }
}

/// Read a grid from uploaded bytes; `file_name` picks the format.
pub fn read_grid_bytes(bytes: Vec<u8>, file_name: &str) -> GridResult<Grid> {
    match GridFormat::from_file_name(file_name)? {
        GridFormat::Workbook => read_workbook_bytes(bytes),
        GridFormat::Csv => read_csv_bytes(&bytes, &display_name(file_name)),
    }
}

fn display_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

// =============================================================================
// CSV
// =============================================================================

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let (charset, _confidence, _language) = chardet::detect(bytes);

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes with the given encoding label.
///
/// Anything that does not decode cleanly falls back to lossy UTF-8, so a
/// misdetected file still parses.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let label = encoding.to_lowercase();
    match label.as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8(bytes.to_vec())
            .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned()),
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        _ => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(enc) => match enc.decode(bytes) {
                (text, _, false) => text.into_owned(),
                (_, _, true) => String::from_utf8_lossy(bytes).into_owned(),
            },
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

/// Lines looked at when guessing the delimiter.
const DELIMITER_SAMPLE_LINES: usize = 20;

/// Detect the delimiter from the first non-empty lines.
///
/// Each separator scores the highest count it reaches on any sampled line,
/// so a bare company-header line at the top does not hide the delimiter of
/// the rows below it.
pub fn detect_delimiter(content: &str) -> u8 {
    let sample: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(DELIMITER_SAMPLE_LINES)
        .collect();

    let mut best_sep = b';';
    let mut best_count = 0;

    for sep in [b';', b',', b'\t', b'|'] {
        let count = sample
            .iter()
            .map(|line| line.matches(sep as char).count())
            .max()
            .unwrap_or(0);
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Read CSV bytes into a grid with encoding and delimiter auto-detection.
///
/// CSV has no header row here: the roster export is positional.
pub fn read_csv_bytes(bytes: &[u8], sheet: &str) -> GridResult<Grid> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    let delimiter = detect_delimiter(content);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(infer_cell).collect());
    }

    if rows.is_empty() {
        return Err(GridError::EmptySheet(sheet.to_string()));
    }

    Ok(Grid::new(sheet, rows))
}

/// Type a CSV field the way a spreadsheet would on import.
///
/// Digit strings with a leading zero stay text so national IDs keep their
/// padding.
fn infer_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Cell::Empty;
    }

    let leading_zero = trimmed.len() > 1
        && trimmed.starts_with('0')
        && !trimmed.starts_with("0.")
        && !trimmed.starts_with("0,");
    // Only numbers that read back exactly as typed; "1.10" or "12E3" stay text.
    if !leading_zero {
        if let Ok(n) = trimmed.parse::<f64>() {
            if n.is_finite() && format_number(n) == trimmed {
                return Cell::Number(n);
            }
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%d/%m/%Y") {
        return Cell::Date(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Cell::Date(date);
    }

    Cell::Text(raw.to_string())
}
