use crate::error::ParseError;

/// Placeholders spreadsheets use for "no value".
const PLACEHOLDERS: &[&str] = &["n/a", "na", "-", "--", "null", "none", ""];

/// Parse a numeric cell, accepting thousands separators and inner spaces.
///
/// Errors quote the raw text so the first failure can be shown to the
/// uploader as-is.
pub fn parse_value(raw: &str) -> Result<f64, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != ' ')
        .collect();
    if PLACEHOLDERS.contains(&cleaned.to_lowercase().as_str()) {
        return Err(ParseError::Placeholder(raw.to_string()));
    }
    cleaned
        .parse::<f64>()
        .map_err(|_| ParseError::NotANumber(raw.to_string()))
}
