//! Spreadsheet ingestion: workbook bytes in, validated identity records out.
//!
//! 1. `parse` reads the first sheet into row mappings keyed by header name
//! 2. `validate_schema` checks the required columns against the first row
//! 3. `normalize` turns each row into an `IdentityRecord`
//!
//! `ingest` runs all three and is all-or-nothing: callers only replace their
//! store when it returns `Ok`.
use crate::models::{CellValue, IdentityRecord, PersonalData};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use std::collections::BTreeMap;
use std::io::Cursor;

/// One data row: column name to raw cell. Empty cells are left out.
pub type RawRow = BTreeMap<String, CellValue>;

/// Columns every workbook must provide, in reporting order.
pub const REQUIRED_COLUMNS: [&str; 12] = [
    "Name",
    "Surname",
    "Nationality",
    "Birthdate",
    "MotherName",
    "FatherName",
    "IDNumber",
    "PermitType",
    "ValidFrom",
    "ValidUntil",
    "Gender",
    "Age",
];

/// Errors that abort an ingestion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The bytes are not a readable workbook.
    #[error("Failed to parse spreadsheet: {0}")]
    Parse(String),
    /// The first row lacks required columns.
    #[error("Spreadsheet is missing columns: {}", .missing.join(", "))]
    Schema { missing: Vec<String> },
}

/// Parses the first sheet of a workbook (xlsx, xlsm, xlsb, xls or ods).
///
/// The first sheet row holds the headers. Header-less columns are ignored, and
/// when a header repeats the leftmost column wins. Rows without any value are
/// skipped.
pub fn parse(bytes: &[u8]) -> Result<Vec<RawRow>, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| IngestError::Parse(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| IngestError::Parse("workbook contains no sheets".to_string()))?
        .map_err(|e| IngestError::Parse(e.to_string()))?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Vec::new());
    };

    let headers: Vec<Option<String>> = header_row.iter().map(header_name).collect();

    let mut parsed = Vec::new();
    for row in rows {
        let mut raw = RawRow::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            let (Some(header), Some(value)) = (header, cell_value(cell)) else {
                continue;
            };
            raw.entry(header.clone()).or_insert(value);
        }

        if !raw.is_empty() {
            parsed.push(raw);
        }
    }

    tracing::debug!("Parsed {} data row(s) from first sheet", parsed.len());
    Ok(parsed)
}

fn header_name(cell: &Data) -> Option<String> {
    let name = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!name.is_empty()).then_some(name)
}

fn cell_value(cell: &Data) -> Option<CellValue> {
    let value = match cell {
        Data::Empty => return None,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => {
            cell.as_date().map(CellValue::Date).unwrap_or(CellValue::Blank)
        }
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(_) => CellValue::Blank,
    };
    Some(value)
}

/// Checks that the first row carries every required column.
///
/// Only row 0 is inspected. An empty sheet is valid.
pub fn validate_schema(rows: &[RawRow], required: &[&str]) -> Result<(), IngestError> {
    let Some(first) = rows.first() else {
        return Ok(());
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|column| !first.contains_key(**column))
        .map(|column| column.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(IngestError::Schema { missing })
    }
}

/// Builds a fresh record from a raw row. Absent columns become `Blank`.
pub fn normalize(row: &RawRow) -> IdentityRecord {
    let column = |name: &str| row.get(name).cloned().unwrap_or(CellValue::Blank);

    IdentityRecord::new(PersonalData {
        name: column("Name"),
        surname: column("Surname"),
        nationality: column("Nationality"),
        birthdate: column("Birthdate"),
        mother_name: column("MotherName"),
        father_name: column("FatherName"),
        id_number: column("IDNumber"),
        permit_type: column("PermitType"),
        valid_from: column("ValidFrom"),
        valid_until: column("ValidUntil"),
        gender: column("Gender"),
        age: column("Age"),
    })
}

/// Parses, validates and normalizes a workbook in one step.
pub fn ingest(bytes: &[u8]) -> Result<Vec<IdentityRecord>, IngestError> {
    let rows = parse(bytes)?;
    validate_schema(&rows, &REQUIRED_COLUMNS)?;

    let records: Vec<IdentityRecord> = rows.iter().map(normalize).collect();
    tracing::info!("✓ Ingested {} identity record(s)", records.len());
    Ok(records)
}

/// Presentation format for date columns: `DD.MM.YYYY` for dates, text as-is,
/// `N/A` for anything else.
pub fn format_date(value: Option<&CellValue>) -> String {
    match value {
        Some(CellValue::Date(date)) => date.format("%d.%m.%Y").to_string(),
        Some(CellValue::Text(text)) => text.clone(),
        _ => "N/A".to_string(),
    }
}
