//! Alias-based field extraction over flexible-schema records.
//!
//! Uploaded sheets and shapefile exports spell the same column many ways
//! ("Area Council", "area_council", "AC_NAME", ...). Each logical field gets an
//! ordered alias list; the first alias present wins and its key is consumed,
//! so whatever remains in the record is leftover metadata.

use crate::model::Metadata;
use serde_json::Value;

/// A raw row or feature property bag, in source order.
pub type Record = Metadata;

/// Remove and return the first key of `aliases` present in `record`.
///
/// Returns the empty string when no alias matches. Later aliases are left in
/// place, so a record carrying two spellings keeps the lower-priority one as
/// metadata.
pub fn take_field(record: &mut Record, aliases: &[&str]) -> String {
    for alias in aliases {
        if let Some(value) = record.shift_remove(*alias) {
            return value_text(&value);
        }
    }
    String::new()
}

/// Drop every listed key, ignoring keys that are absent.
pub fn drop_keys(record: &mut Record, keys: &[&str]) {
    for key in keys {
        record.shift_remove(*key);
    }
}

/// Text form of a raw value: strings as-is, null as empty, the rest as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Trimmed text, or `None` when nothing is left.
pub fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build a record from a header row and one data row. Missing trailing cells
/// become empty strings; surplus cells are ignored.
pub fn record_from_row<'a, I>(headers: &[String], cells: I) -> Record
where
    I: IntoIterator<Item = &'a str>,
{
    let mut cells = cells.into_iter();
    let mut record = Record::new();
    for header in headers {
        let cell = cells.next().unwrap_or("");
        record.insert(header.clone(), Value::String(cell.to_string()));
    }
    record
}
