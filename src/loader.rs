//! Reads an uploaded receivables workbook into a [`RawTable`].
//!
//! The first worksheet is used, its first row is the header row. CSV uploads
//! go through the same shape so every downstream module sees one type.

use crate::error::{DashboardError, Result};
use crate::table::{excel_serial_to_date, parse_date, RawCell, RawTable};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use log::{debug, info};
use std::fs;
use std::io::Cursor;
use std::path::Path;

/// Upload formats the loader understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadFormat {
    Excel,
    Csv,
}

impl UploadFormat {
    /// Guesses the format from a file name; anything that is not `.csv`
    /// is handed to the spreadsheet reader.
    pub fn from_filename(name: &str) -> Self {
        if name.to_lowercase().ends_with(".csv") {
            UploadFormat::Csv
        } else {
            UploadFormat::Excel
        }
    }
}

/// Parse an uploaded file held in memory
///
/// # Arguments
/// * `bytes` - Raw file contents as received from the upload form
/// * `filename` - Original file name, used to pick the reader
///
/// # Returns
/// * `Result<RawTable>` - Header row plus data rows, trailing blank rows removed
pub fn load_bytes(bytes: &[u8], filename: &str) -> Result<RawTable> {
    let table = match UploadFormat::from_filename(filename) {
        UploadFormat::Csv => from_csv_bytes(bytes)?,
        UploadFormat::Excel => from_excel_bytes(bytes.to_vec())?,
    };
    info!(
        "loaded {} ({} columns, {} rows)",
        filename,
        table.width(),
        table.height()
    );
    Ok(table)
}

/// Load the first worksheet of an Excel file (xlsx, xlsm, xls, ods)
///
/// # Arguments
/// * `filepath` - Path to the workbook
///
/// # Returns
/// * `Result<RawTable>` - The sheet as a raw table or an error
pub fn from_excel(filepath: impl AsRef<Path>) -> Result<RawTable> {
    let bytes = fs::read(filepath)?;
    from_excel_bytes(bytes)
}

pub fn from_excel_bytes(bytes: Vec<u8>) -> Result<RawTable> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| DashboardError::Workbook("the workbook has no worksheets".to_string()))?;
    debug!("reading worksheet '{}'", sheet_name);

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows();

    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .map(|c| data_to_cell(c).as_text().trim().to_string())
            .collect(),
        None => {
            return Err(DashboardError::Workbook(format!(
                "worksheet '{}' is empty",
                sheet_name
            )));
        }
    };

    let mut table = RawTable::new(headers);
    for row in rows {
        table.push_row(row.iter().map(data_to_cell).collect());
    }
    table.trim_blank_rows();
    Ok(table)
}

/// Converts a calamine cell into a [`RawCell`]. Date cells become dates;
/// error cells read as empty.
pub fn data_to_cell(d: &Data) -> RawCell {
    match d {
        Data::Empty | Data::Error(_) => RawCell::Empty,
        Data::String(s) => {
            if s.trim().is_empty() {
                RawCell::Empty
            } else {
                RawCell::Text(s.clone())
            }
        }
        Data::Float(f) => RawCell::Number(*f),
        Data::Int(i) => RawCell::Number(*i as f64),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::DateTime(dt) => match excel_serial_to_date(dt.as_f64()) {
            Some(date) => RawCell::Date(date),
            None => RawCell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => match parse_date(s) {
            Some(date) => RawCell::Date(date),
            None => RawCell::Text(s.clone()),
        },
        Data::DurationIso(s) => RawCell::Text(s.clone()),
    }
}

/// Load a CSV export of the receivables sheet
///
/// Accepts comma- or semicolon-separated files; the separator is whichever
/// occurs more often in the header line. Rows may be ragged.
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<RawTable> {
    let bytes = fs::read(filepath)?;
    from_csv_bytes(&bytes)
}

pub fn from_csv_bytes(bytes: &[u8]) -> Result<RawTable> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DashboardError::Workbook("CSV file is empty".to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(bytes))
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut table = RawTable::new(headers);
    for record in reader.records() {
        let record = record?;
        table.push_row(
            record
                .iter()
                .map(|v| {
                    if v.trim().is_empty() {
                        RawCell::Empty
                    } else {
                        RawCell::Text(v.to_string())
                    }
                })
                .collect(),
        );
    }
    table.trim_blank_rows();
    Ok(table)
}

fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let count = |d: u8| first_line.iter().filter(|b| **b == d).count();
    if count(b';') > count(b',') { b';' } else { b',' }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn reads_semicolon_csv() {
        let data = "Cliente;Estado;Total 2020\nA;PENDIENTE;1.234,50\nB;COBRADO;\n;;\n";
        let table = from_csv_bytes(data.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["Cliente", "Estado", "Total 2020"]);
        assert_eq!(table.height(), 2);
        assert_eq!(table.cell(0, 2), &RawCell::Text("1.234,50".into()));
        assert_eq!(table.cell(1, 2), &RawCell::Empty);
    }

    #[test]
    fn reads_comma_csv_with_bom() {
        let data = "\u{feff}Cliente,Total 2020\nA,10\n";
        let table = from_csv_bytes(data.as_bytes()).unwrap();
        assert_eq!(table.headers, vec!["Cliente", "Total 2020"]);
        assert_eq!(table.height(), 1);
    }

    #[test]
    fn empty_csv_is_rejected() {
        assert!(matches!(
            from_csv_bytes(b"  \n"),
            Err(DashboardError::Workbook(_))
        ));
    }

    #[test]
    fn reads_first_sheet_of_xlsx() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Cliente").unwrap();
        sheet.write_string(0, 1, "Total 2020").unwrap();
        sheet.write_string(1, 0, "A").unwrap();
        sheet.write_number(1, 1, 125.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = load_bytes(&bytes, "cobros.xlsx").unwrap();
        assert_eq!(table.headers, vec!["Cliente", "Total 2020"]);
        assert_eq!(table.cell(0, 0), &RawCell::Text("A".into()));
        assert_eq!(table.cell(0, 1), &RawCell::Number(125.5));
    }

    #[test]
    fn garbage_is_a_workbook_error() {
        let err = load_bytes(b"not a workbook", "cobros.xlsx").unwrap_err();
        assert!(matches!(err, DashboardError::Workbook(_)));
    }

    #[test]
    fn serial_dates_convert() {
        assert_eq!(
            excel_serial_to_date(45352.0),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }
}
