//! Filters, ordering and pagination for the read API.

use chrono::NaiveDate;
use geo::{coord, BoundingRect, Intersects, Rect};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::model::{DatasetType, Metadata};

// =============================================================================
// PAGINATION
// =============================================================================

/// Page size policy of one endpoint family.
#[derive(Debug, Clone, Copy)]
pub struct PagePolicy {
    pub default_size: u32,
    pub max_size: u32,
}

pub const CLUSTER_PAGES: PagePolicy = PagePolicy { default_size: 20, max_size: 200 };
pub const DATASET_PAGES: PagePolicy = PagePolicy { default_size: 100, max_size: 500 };
pub const ITEM_PAGES: PagePolicy = PagePolicy { default_size: 1000, max_size: 5000 };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub size: u32,
}

impl PageRequest {
    pub fn new(policy: PagePolicy, page: Option<u32>, size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            size: size.unwrap_or(policy.default_size).clamp(1, policy.max_size),
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.size as u64
    }

    /// Slice an already filtered result set.
    pub fn apply<T>(&self, items: Vec<T>) -> Page<T> {
        let count = items.len() as u64;
        let results = items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.size as usize)
            .collect();
        Page { count, results }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Total matches before slicing.
    pub count: u64,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            count: self.count,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

// =============================================================================
// DATASET FILTERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetOrder {
    Name,
    Id,
    Created,
    Updated,
}

impl DatasetOrder {
    pub fn column(&self) -> &'static str {
        match self {
            DatasetOrder::Name => "name",
            DatasetOrder::Id => "id",
            DatasetOrder::Created => "created",
            DatasetOrder::Updated => "updated",
        }
    }
}

/// Parse `order_by` values such as `name` or `-updated`.
pub fn parse_order(raw: &str) -> Option<(DatasetOrder, bool)> {
    let (descending, field) = match raw.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.trim()),
    };
    let order = match field {
        "name" => DatasetOrder::Name,
        "id" => DatasetOrder::Id,
        "created" => DatasetOrder::Created,
        "updated" => DatasetOrder::Updated,
        _ => return None,
    };
    Some((order, descending))
}

#[derive(Debug, Clone, Default)]
pub struct DatasetFilter {
    /// Case-insensitive substring.
    pub name: Option<String>,
    /// Case-insensitive substring.
    pub source: Option<String>,
    pub dataset_type: Option<DatasetType>,
    /// Exact cluster name, case-insensitive.
    pub cluster: Option<String>,
    pub created_after: Option<NaiveDate>,
    pub created_before: Option<NaiveDate>,
    /// Field and descending flag; defaults to creation order.
    pub order: Option<(DatasetOrder, bool)>,
}

// =============================================================================
// ITEM FILTERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    /// Parse `minx,miny,maxx,maxy`.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [a, b, c, d] => Some(Self {
                min_x: a.min(*c),
                min_y: b.min(*d),
                max_x: a.max(*c),
                max_y: b.max(*d),
            }),
            _ => None,
        }
    }

    pub fn rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
    }

    /// Whether the geometry's envelope touches this box. Geometries that do
    /// not convert never match.
    pub fn intersects_geometry(&self, geometry: &geojson::Geometry) -> bool {
        envelope(geometry).map_or(false, |env| env.intersects(&self.rect()))
    }
}

/// Bounding rectangle of a GeoJSON geometry.
pub fn envelope(geometry: &geojson::Geometry) -> Option<Rect<f64>> {
    let shape = geo::Geometry::<f64>::try_from(geometry.value.clone()).ok()?;
    shape.bounding_rect()
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub id: Option<Uuid>,
    /// Case-insensitive substring.
    pub attribute: Option<String>,
    /// Exact province name, case-insensitive.
    pub province: Option<String>,
    /// Exact area council name, case-insensitive.
    pub area_council: Option<String>,
    /// Inclusive lower date bound (tabular only).
    pub date_after: Option<NaiveDate>,
    /// Inclusive upper date bound (tabular only).
    pub date_before: Option<NaiveDate>,
    /// Exact typed matches on metadata keys.
    pub metadata: Vec<(String, Value)>,
    /// Case-insensitive substring (vector only).
    pub name: Option<String>,
    /// Case-insensitive substring (vector only).
    pub reference: Option<String>,
    /// Geometry envelope intersection (vector only).
    pub bbox: Option<BBox>,
}

impl ItemFilter {
    /// Metadata filters as one JSON object, for containment queries.
    pub fn metadata_object(&self) -> Metadata {
        self.metadata.iter().cloned().collect()
    }

    pub fn metadata_matches(&self, metadata: &Metadata) -> bool {
        self.metadata
            .iter()
            .all(|(key, expected)| metadata.get(key).map_or(false, |actual| same_value(actual, expected)))
    }
}

/// JSON equality where numbers compare by value, so `2` matches `2.0`.
fn same_value(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Parse `key=value,key2=value2`. Pairs without exactly one `=` are ignored.
///
/// Values containing a `.` are read as floats, others as integers, then
/// `true`/`false`, and finally kept as strings.
pub fn parse_metadata_filter(raw: &str) -> Vec<(String, Value)> {
    raw.split(',')
        .filter_map(|pair| {
            let parts: Vec<&str> = pair.split('=').collect();
            match parts.as_slice() {
                [key, value] => Some((key.trim().to_string(), typed_value(value.trim()))),
                _ => None,
            }
        })
        .collect()
}

fn typed_value(raw: &str) -> Value {
    let numeric = if raw.contains('.') {
        raw.parse::<f64>().ok().map(Value::from)
    } else {
        raw.parse::<i64>().ok().map(Value::from)
    };
    if let Some(v) = numeric {
        return v;
    }
    match raw.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

pub(crate) fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

pub(crate) fn eq_ci(value: Option<&str>, expected: &str) -> bool {
    value
        .map(|v| v.to_lowercase() == expected.to_lowercase())
        .unwrap_or(false)
}
