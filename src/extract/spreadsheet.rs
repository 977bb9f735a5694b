use crate::error::{IngestError, Result};
use crate::utils::excel_serial_to_date;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use log::{debug, warn};
use std::io::Cursor;

/// One worksheet rendered to text cells.
#[derive(Debug, Clone)]
pub struct SheetRows {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// Reads every non-empty worksheet of an XLSX/XLS/XLSM/XLSB/ODS workbook.
pub fn read_sheets(bytes: &[u8], filename: &str) -> Result<Vec<SheetRows>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| IngestError::parsing(filename, format!("cannot open workbook: {}", e)))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                warn!("'{}': skipping unreadable sheet '{}': {}", filename, name, e);
                continue;
            }
        };

        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
            .filter(|row: &Vec<String>| row.iter().any(|c| !c.is_empty()))
            .collect();

        if rows.is_empty() {
            continue;
        }
        debug!("'{}': sheet '{}' has {} rows", filename, name, rows.len());
        sheets.push(SheetRows { name, rows });
    }

    if sheets.is_empty() {
        return Err(IngestError::parsing(filename, "workbook has no non-empty sheets"));
    }
    Ok(sheets)
}

pub(crate) fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => n.to_string(),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}
