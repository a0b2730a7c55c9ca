//! Spreadsheet export of tabular items.
//!
//! Items carry free-form metadata, so the sheet is built in two passes: collect
//! the union of metadata keys, then project every item onto that fixed column
//! set with blanks where a key is absent.

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde_json::Value;
use uuid::Uuid;

use crate::model::TabularItem;

pub const FIXED_COLUMNS: [&str; 6] = ["id", "attribute", "date", "value", "province", "area_council"];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("spreadsheet export failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("spreadsheet export failed: column {0} is out of range")]
    TooManyColumns(usize),

    #[error("spreadsheet export failed: row {0} is out of range")]
    TooManyRows(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl From<&Value> for Cell {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Blank,
            Value::String(s) => Cell::Text(s.clone()),
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Blank),
            other => Cell::Text(other.to_string()),
        }
    }
}

fn text(value: Option<&str>) -> Cell {
    value.map(|v| Cell::Text(v.to_string())).unwrap_or(Cell::Blank)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Project items onto the fixed columns plus one column per metadata key, in
/// first-seen order. Keys named like a fixed column are not repeated.
pub fn project(items: &[TabularItem]) -> Sheet {
    let mut metadata_keys: Vec<&str> = Vec::new();
    for item in items {
        for key in item.metadata.keys() {
            if !FIXED_COLUMNS.contains(&key.as_str()) && !metadata_keys.contains(&key.as_str()) {
                metadata_keys.push(key);
            }
        }
    }

    let rows = items
        .iter()
        .map(|item| {
            let mut row = vec![
                Cell::Text(item.id.to_string()),
                text(item.attribute.as_deref()),
                item.date.map(|d| Cell::Text(d.to_string())).unwrap_or(Cell::Blank),
                Cell::Number(item.value),
                text(item.province.as_ref().map(|p| p.name.as_str())),
                text(item.area_council.as_ref().map(|a| a.name.as_str())),
            ];
            row.extend(
                metadata_keys
                    .iter()
                    .map(|key| item.metadata.get(*key).map(Cell::from).unwrap_or(Cell::Blank)),
            );
            row
        })
        .collect();

    Sheet {
        columns: FIXED_COLUMNS
            .iter()
            .copied()
            .chain(metadata_keys)
            .map(str::to_string)
            .collect(),
        rows,
    }
}

/// Render a sheet as XLSX bytes with a bold header row.
pub fn render_xlsx(sheet: &Sheet) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let bold = Format::new().set_bold();

    column_index(sheet.columns.len().saturating_sub(1))?;
    row_index(sheet.rows.len())?;

    for (col, name) in sheet.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, column_index(col)?, name, &bold)?;
    }
    for (r, row) in sheet.rows.iter().enumerate() {
        let r = row_index(r + 1)?;
        for (col, cell) in row.iter().enumerate() {
            let col = column_index(col)?;
            match cell {
                Cell::Blank => {}
                Cell::Text(s) => {
                    worksheet.write_string(r, col, s)?;
                }
                Cell::Number(n) => {
                    worksheet.write_number(r, col, *n)?;
                }
                Cell::Bool(b) => {
                    worksheet.write_boolean(r, col, *b)?;
                }
            }
        }
    }
    Ok(workbook.save_to_buffer()?)
}

fn column_index(col: usize) -> Result<u16, ExportError> {
    u16::try_from(col).map_err(|_| ExportError::TooManyColumns(col))
}

fn row_index(row: usize) -> Result<u32, ExportError> {
    u32::try_from(row).map_err(|_| ExportError::TooManyRows(row))
}

pub fn export_filename(dataset_id: Uuid) -> String {
    format!("catalog-tabular-{}.xlsx", dataset_id)
}
