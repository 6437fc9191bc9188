//! Shared fixtures for integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use rust_permit_api::config::Config;
use rust_permit_api::enrichment::GenerationPolicy;
use rust_permit_api::ingest::REQUIRED_COLUMNS;
use rust_permit_api::models::{CellValue, IdentityRecord, PersonalData};
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use std::time::Duration;

/// A cell to write into a fixture workbook.
#[derive(Debug, Clone)]
pub enum Cell {
    Text(String),
    Number(f64),
    Date(u16, u8, u8),
    Empty,
}

impl From<&str> for Cell {
    fn from(text: &str) -> Self {
        Cell::Text(text.to_string())
    }
}

/// Builds an xlsx file in memory with `headers` in row 1 and `rows` below.
pub fn workbook_bytes(headers: &[&str], rows: &[Vec<Cell>]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    write_sheet(&mut workbook, headers, rows);
    workbook.save_to_buffer().unwrap()
}

pub fn write_sheet(workbook: &mut Workbook, headers: &[&str], rows: &[Vec<Cell>]) {
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = workbook.add_worksheet();

    for (col, header) in headers.iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }

    for (row_idx, row) in rows.iter().enumerate() {
        let row_num = row_idx as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(text) => {
                    sheet.write_string(row_num, col, text.as_str()).unwrap();
                }
                Cell::Number(n) => {
                    sheet.write_number(row_num, col, *n).unwrap();
                }
                Cell::Date(y, m, d) => {
                    let date = ExcelDateTime::from_ymd(*y, *m, *d).unwrap();
                    sheet
                        .write_datetime_with_format(row_num, col, &date, &date_format)
                        .unwrap();
                }
                Cell::Empty => {}
            }
        }
    }
}

/// A complete row in `REQUIRED_COLUMNS` order.
pub fn person_row(name: &str, surname: &str, age: f64) -> Vec<Cell> {
    vec![
        name.into(),
        surname.into(),
        "Syrian".into(),
        Cell::Date(2024, 3, 7),
        "Fatma".into(),
        "Ali".into(),
        Cell::Number(99812345670.0),
        "Short Term".into(),
        Cell::Date(2024, 1, 15),
        "N/A-custom".into(),
        "male".into(),
        Cell::Number(age),
    ]
}

/// Workbook with all required columns and one row per `(name, surname, age)`.
pub fn people_workbook(people: &[(&str, &str, f64)]) -> Vec<u8> {
    let rows: Vec<Vec<Cell>> = people
        .iter()
        .map(|(name, surname, age)| person_row(name, surname, *age))
        .collect();
    workbook_bytes(&REQUIRED_COLUMNS, &rows)
}

/// Record built directly, bypassing the workbook parser.
pub fn record(name: &str) -> IdentityRecord {
    IdentityRecord::new(PersonalData {
        name: name.into(),
        surname: "Demir".into(),
        nationality: "Iraqi".into(),
        birthdate: CellValue::Date(NaiveDate::from_ymd_opt(1988, 11, 2).unwrap()),
        mother_name: "Zeynep".into(),
        father_name: "Hasan".into(),
        id_number: CellValue::Number(99700000001.0),
        permit_type: "Family".into(),
        valid_from: "01.02.2024".into(),
        valid_until: "01.02.2026".into(),
        gender: "female".into(),
        age: CellValue::Number(29.0),
    })
}

/// Helper function to create test config
pub fn test_config(image_api_url: String) -> Config {
    Config {
        port: 8080,
        image_api_url,
        image_api_key: "test-key".to_string(),
        generation_timeout: Duration::from_secs(5),
        generation_policy: GenerationPolicy::PerRecord,
        max_upload_bytes: 5 * 1024 * 1024,
    }
}
