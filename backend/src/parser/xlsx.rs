//! Workbook reader backed by calamine.

use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::NaiveDate;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use super::{Cell, Grid};
use crate::error::{GridError, GridResult};

/// Read the first worksheet of a workbook on disk.
pub fn read_workbook(path: &Path) -> GridResult<Grid> {
    let workbook = open_workbook_auto(path)
        .map_err(|e| GridError::Workbook(format!("{}: {}", path.display(), e)))?;
    first_sheet(workbook)
}

/// Read the first worksheet of an in-memory workbook.
pub fn read_workbook_bytes(bytes: Vec<u8>) -> GridResult<Grid> {
    let workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| GridError::Workbook(e.to_string()))?;
    first_sheet(workbook)
}

fn first_sheet<RS: Read + Seek>(mut workbook: Sheets<RS>) -> GridResult<Grid> {
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| GridError::Workbook("workbook contains no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| GridError::Workbook(format!("sheet '{}': {}", sheet_name, e)))?;

    if range.is_empty() {
        return Err(GridError::EmptySheet(sheet_name));
    }

    // Data may not begin at A1; keep absolute positions so column offsets hold.
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let (start_row, start_col) = (start_row as usize, start_col as usize);

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col];
        cells.extend(row.iter().map(convert_cell));
        rows.push(cells);
    }

    Ok(Grid::new(sheet_name, rows))
}

fn convert_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Bool(*b),
        // Date-formatted numeric cells keep their serial.
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) => s
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn workbook_bytes() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Ativos").unwrap();
        // Nothing in row 0 or column A: the used range starts at B2.
        sheet.write_string(1, 1, "LARSIL FLORESTAL LTDA").unwrap();
        sheet.write_number(2, 1, 17.0).unwrap();
        sheet.write_string(2, 5, "JOSE DA SILVA").unwrap();
        sheet.write_number(2, 23, 45000.0).unwrap();
        workbook.add_worksheet().set_name("Outra").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_reads_first_sheet_at_absolute_positions() {
        let grid = read_workbook_bytes(workbook_bytes()).unwrap();

        assert_eq!(grid.sheet, "Ativos");
        assert_eq!(grid.cell(0, 0), &Cell::Empty);
        assert_eq!(grid.cell(1, 1), &Cell::Text("LARSIL FLORESTAL LTDA".into()));
        assert_eq!(grid.cell(2, 1), &Cell::Number(17.0));
        assert_eq!(grid.cell(2, 5), &Cell::Text("JOSE DA SILVA".into()));
        assert_eq!(grid.cell(2, 23), &Cell::Number(45000.0));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let err = read_workbook_bytes(b"definitely not a workbook".to_vec()).unwrap_err();
        assert!(matches!(err, GridError::Workbook(_)));
    }

    #[test]
    fn test_iso_datetime_becomes_date() {
        assert_eq!(
            convert_cell(&Data::DateTimeIso("2023-03-15T00:00:00".into())),
            Cell::Date(NaiveDate::from_ymd_opt(2023, 3, 15).unwrap())
        );
        assert_eq!(convert_cell(&Data::Int(8)), Cell::Number(8.0));
    }
}
