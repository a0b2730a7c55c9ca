//! Upload decoding: bytes in, header/row tables or GeoJSON features out.
//!
//! Responsibilities:
//! - Detect the upload kind from the file name
//! - Decode UTF-8 text (BOM tolerated) and CSV framing
//! - Read the first sheet of XLSX/XLS workbooks with calamine
//! - Check the outer GeoJSON shape (a `features` array)
//!
//! Anything that fails here rejects the whole file.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use serde_json::Value;

use crate::error::ImportError;
use crate::fields::{record_from_row, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Csv,
    Workbook,
    GeoJson,
}

/// Upload kind by file extension, case-insensitive.
pub fn upload_kind(file_name: &str) -> Option<UploadKind> {
    let lower = file_name.trim().to_lowercase();
    if lower.ends_with(".csv") {
        Some(UploadKind::Csv)
    } else if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
        Some(UploadKind::Workbook)
    } else if lower.ends_with(".geojson") {
        Some(UploadKind::GeoJson)
    } else {
        None
    }
}

// =============================================================================
// TABLES
// =============================================================================

/// A header row plus data rows, cells as text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Rows keyed by header. Duplicate headers keep the last cell.
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.rows
            .iter()
            .map(|row| record_from_row(&self.headers, row.iter().map(String::as_str)))
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read a tabular upload (CSV or workbook) chosen by file name.
pub fn read_table(file_name: &str, bytes: &[u8]) -> Result<Table, ImportError> {
    match upload_kind(file_name) {
        Some(UploadKind::Csv) => read_csv(bytes),
        Some(UploadKind::Workbook) => read_workbook(bytes),
        _ => Err(ImportError::NotTabular(file_name.to_string())),
    }
}

/// UTF-8 text with any byte-order mark removed.
pub fn decode_text(bytes: &[u8]) -> Result<String, ImportError> {
    let (text, had_errors) = encoding_rs::UTF_8.decode_with_bom_removal(bytes);
    if had_errors {
        return Err(ImportError::Encoding);
    }
    Ok(text.into_owned())
}

pub fn read_csv(bytes: &[u8]) -> Result<Table, ImportError> {
    let content = decode_text(bytes)?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(Table { headers, rows })
}

/// First sheet of an XLSX/XLS workbook; its first row is the header.
pub fn read_workbook(bytes: &[u8]) -> Result<Table, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Workbook(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::Workbook("workbook has no sheets".to_string()))?
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let headers = rows.next().unwrap_or_default();
    let rows = rows
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect();
    Ok(Table { headers, rows })
}

/// Cell text as a CSV export would show it: whole floats lose their `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// GEOJSON
// =============================================================================

/// One feature as uploaded. Geometry is validated per feature during import.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub properties: Record,
    pub geometry: Option<Value>,
}

pub fn ensure_geojson_name(file_name: &str) -> Result<(), ImportError> {
    match upload_kind(file_name) {
        Some(UploadKind::GeoJson) => Ok(()),
        _ => Err(ImportError::NotGeoJson(file_name.to_string())),
    }
}

/// Parse a FeatureCollection body. A missing `features` array is fatal; a
/// malformed feature is not.
pub fn read_features(bytes: &[u8]) -> Result<Vec<RawFeature>, ImportError> {
    let content = decode_text(bytes)?;
    let document: Value = serde_json::from_str(&content)?;
    let features = document
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| ImportError::Format("GeoJSON has no 'features' array".to_string()))?;

    Ok(features
        .iter()
        .map(|feature| RawFeature {
            properties: match feature.get("properties") {
                Some(Value::Object(map)) => map.clone(),
                _ => Record::new(),
            },
            geometry: feature.get("geometry").filter(|g| !g.is_null()).cloned(),
        })
        .collect())
}
