//! Row normalization for tabular rows and GeoJSON features.
//!
//! Both variants pull named fields out of the raw property bag through an
//! explicit alias table (see [`crate::fields`]), strip technical keys, and keep
//! the rest as ordered metadata.

use crate::fields::{drop_keys, non_empty, take_field, Record};
use crate::model::Metadata;
use chrono::NaiveDate;
use serde_json::Value;

// =============================================================================
// ALIAS TABLES
// =============================================================================

const CSV_AREA_COUNCIL: &[&str] = &["Area Council", "area_council", "area council", "Area council"];
const CSV_PROVINCE: &[&str] = &["Province", "province"];
const CSV_VALUE: &[&str] = &["Value", "value", "VALUE"];
const CSV_ATTRIBUTE: &[&str] = &[
    "Attribute",
    "attribute",
    "Indicator",
    "indicator",
    "Variable",
    "variable",
];
const CSV_YEAR: &[&str] = &["Year", "year", "YEAR"];
const CSV_MONTH: &[&str] = &["Month", "month", "MONTH"];
const CSV_CLUSTER: &[&str] = &["Cluster", "cluster"];
const CSV_TYPE: &[&str] = &["Type", "type"];

/// Columns that describe the dataset rather than the observation.
const CSV_DROPPED: &[&str] = &[
    "Unit",
    "National",
    "Source",
    "Year Collected",
    "Frequency Collection",
    "Day",
    "Indicator",
];

pub(crate) const GEO_AREA_COUNCIL: &[&str] = &[
    "Area Council",
    "area_council",
    "area council",
    "Area council",
    "AC_NAME",
    "area_council_name",
    "ACNAME22",
    "ACNAME22_2",
];
pub(crate) const GEO_PROVINCE: &[&str] = &["Province", "province", "Pname", "province_name", "Pname_2"];
const GEO_NAME: &[&str] = &["Name", "name"];
const GEO_REF: &[&str] = &["ref", "Ref", "REF", "id"];
const GEO_ATTRIBUTE: &[&str] = &["Attribute", "attribute", "Type", "type", "TYPE"];

/// Internal ids and duplicated join keys left behind by shapefile exports.
const GEO_BLACKLIST: &[&str] = &["PID", "PID_2", "Pname_2", "AC2022", "AC2022_2", "ACNAME22_2"];

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

// =============================================================================
// ROW TYPES
// =============================================================================

/// Raw input to the normalizer.
#[derive(Debug, Clone)]
pub enum RawRow {
    /// One CSV/workbook row keyed by header.
    Tabular(Record),
    /// The `properties` object of one GeoJSON feature.
    Feature(Record),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRow {
    Tabular(TabularRow),
    Feature(FeatureRow),
}

/// Shape shared by both normalized variants.
pub trait NormalizedRecord {
    fn province_text(&self) -> &str;
    fn area_council_text(&self) -> &str;
    fn attribute(&self) -> Option<&str>;
    fn metadata(&self) -> &Metadata;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularRow {
    pub area_council: String,
    pub province: String,
    /// Raw value text, parsed later so failures can be tallied.
    pub value: String,
    pub attribute: Option<String>,
    pub year: String,
    pub month: String,
    pub cluster: String,
    pub dataset_type: String,
    pub date: Option<NaiveDate>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub area_council: String,
    pub province: String,
    pub name: Option<String>,
    pub reference: Option<String>,
    pub attribute: Option<String>,
    pub metadata: Metadata,
}

impl NormalizedRecord for TabularRow {
    fn province_text(&self) -> &str {
        &self.province
    }
    fn area_council_text(&self) -> &str {
        &self.area_council
    }
    fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl NormalizedRecord for FeatureRow {
    fn province_text(&self) -> &str {
        &self.province
    }
    fn area_council_text(&self) -> &str {
        &self.area_council
    }
    fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

pub fn normalize(raw: RawRow) -> NormalizedRow {
    match raw {
        RawRow::Tabular(record) => NormalizedRow::Tabular(TabularRow::from_record(record)),
        RawRow::Feature(record) => NormalizedRow::Feature(FeatureRow::from_properties(record)),
    }
}

impl TabularRow {
    pub fn from_record(mut record: Record) -> Self {
        let area_council = take_field(&mut record, CSV_AREA_COUNCIL).trim().to_string();
        let province = take_field(&mut record, CSV_PROVINCE).trim().to_string();
        let value = take_field(&mut record, CSV_VALUE).trim().to_string();
        let attribute = non_empty(&take_field(&mut record, CSV_ATTRIBUTE));
        let year = take_field(&mut record, CSV_YEAR).trim().to_string();
        let month = take_field(&mut record, CSV_MONTH).trim().to_string();
        let cluster = take_field(&mut record, CSV_CLUSTER).trim().to_string();
        let dataset_type = take_field(&mut record, CSV_TYPE).trim().to_string();
        let date = row_date(&year, &month);

        drop_keys(&mut record, CSV_DROPPED);
        record.retain(|_, v| !matches!(v, Value::String(s) if s.is_empty()));

        Self {
            area_council,
            province,
            value,
            attribute,
            year,
            month,
            cluster,
            dataset_type,
            date,
            metadata: record,
        }
    }
}

impl FeatureRow {
    pub fn from_properties(mut properties: Record) -> Self {
        let area_council = take_field(&mut properties, GEO_AREA_COUNCIL).trim().to_string();
        let province = take_field(&mut properties, GEO_PROVINCE).trim().to_string();
        let name = non_empty(&take_field(&mut properties, GEO_NAME));
        let reference = non_empty(&take_field(&mut properties, GEO_REF));
        let attribute = non_empty(&take_field(&mut properties, GEO_ATTRIBUTE));

        properties.retain(|_, v| !is_blank_property(v));
        drop_keys(&mut properties, GEO_BLACKLIST);

        Self {
            area_council,
            province,
            name,
            reference,
            attribute,
            metadata: properties,
        }
    }
}

/// Falsy properties carry nothing worth keeping: null, `false`, zero and
/// empty values, plus the literal string `"null"`.
fn is_blank_property(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "null",
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// 1-based month for an English month name; anything else is January.
pub fn month_number(month: &str) -> u32 {
    let month = month.trim().to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == month)
        .map(|i| i as u32 + 1)
        .unwrap_or(1)
}

/// First day of the row's month, or `None` when the year is missing or not a
/// number.
pub fn row_date(year: &str, month: &str) -> Option<NaiveDate> {
    let year: i32 = year.trim().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month_number(month), 1)
}
