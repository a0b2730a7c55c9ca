//! Import orchestration for long, wide and GeoJSON uploads.
//!
//! Responsibilities:
//! - Run each row/feature through normalize -> parse value -> resolve regions -> create
//! - Tally created and failed rows, keeping the first failure message
//! - Reject a whole file only for outer failures (kind, encoding, framing)
//! - Merge per-file summaries of multi-file uploads into status messages
//!
//! Rows are processed sequentially and each insert stands alone: a failure
//! halfway through leaves earlier rows stored.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ImportError, RowError, StoreError};
use crate::fields::Record;
use crate::model::{DatasetKind, Metadata, NewTabularItem, NewVectorItem};
use crate::normalize::{FeatureRow, TabularRow};
use crate::regions::{resolve, resolve_named};
use crate::store::CatalogStore;
use crate::upload::{ensure_geojson_name, read_features, read_table, RawFeature, Table};
use crate::values::parse_value;

pub const DEFAULT_YEAR: i32 = 2024;
pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    /// One row per observation.
    #[default]
    Long,
    /// One row per region, one column per attribute.
    Wide,
    GeoJson,
}

impl FromStr for ImportFormat {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(ImportFormat::Long),
            "wide" => Ok(ImportFormat::Wide),
            "geojson" => Ok(ImportFormat::GeoJson),
            other => Err(ImportError::Format(format!("unknown import format '{}'", other))),
        }
    }
}

impl ImportFormat {
    pub fn dataset_kind(&self) -> DatasetKind {
        match self {
            ImportFormat::Long | ImportFormat::Wide => DatasetKind::Tabular,
            ImportFormat::GeoJson => DatasetKind::Vector,
        }
    }
}

/// Validate a wide-format fallback year.
pub fn check_year(year: i32) -> Result<i32, ImportError> {
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(year)
    } else {
        Err(ImportError::InvalidYear(year))
    }
}

// =============================================================================
// SUMMARIES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub errors: usize,
    pub first_error: Option<String>,
}

impl ImportSummary {
    fn record_created(&mut self) {
        self.created += 1;
    }

    fn record_error(&mut self, position: usize, err: &dyn fmt::Display) {
        warn!(position, error = %err, "row rejected");
        self.errors += 1;
        if self.first_error.is_none() {
            self.first_error = Some(err.to_string());
        }
    }

    /// Add another file's counts. The earliest first error is kept.
    pub fn merge(&mut self, other: ImportSummary) {
        self.created += other.created;
        self.errors += other.errors;
        if self.first_error.is_none() {
            self.first_error = other.first_error;
        }
    }

    pub fn messages(&self) -> Vec<StatusMessage> {
        let mut messages = Vec::new();
        if self.created > 0 {
            messages.push(StatusMessage::success(format!(
                "Successfully created {} new records",
                self.created
            )));
        }
        if self.errors > 0 {
            let mut text = format!("Failed to create {} items.", self.errors);
            if let Some(first) = &self.first_error {
                text.push_str(&format!(" First error: {}", first));
            }
            messages.push(StatusMessage::warning(text));
        }
        messages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Success,
    Warning,
    Error,
}

/// One line of user-facing import feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub level: MessageLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn success(text: impl Into<String>) -> Self {
        Self { level: MessageLevel::Success, text: text.into() }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self { level: MessageLevel::Warning, text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { level: MessageLevel::Error, text: text.into() }
    }
}

// =============================================================================
// LONG FORMAT
// =============================================================================

/// One observation per record.
pub async fn import_long<S, I>(store: &S, dataset_id: Uuid, records: I) -> ImportSummary
where
    S: CatalogStore + ?Sized,
    I: IntoIterator<Item = Record>,
{
    let mut summary = ImportSummary::default();
    for (position, record) in records.into_iter().enumerate() {
        match import_long_row(store, dataset_id, record).await {
            Ok(_) => summary.record_created(),
            Err(e) => summary.record_error(position + 1, &e),
        }
    }
    summary
}

async fn import_long_row<S>(store: &S, dataset_id: Uuid, record: Record) -> Result<Uuid, RowError>
where
    S: CatalogStore + ?Sized,
{
    let row = TabularRow::from_record(record);
    let value = parse_value(&row.value)?;
    let region = resolve_named(store, &row.province, &row.area_council).await?;
    let id = store
        .create_tabular_item(NewTabularItem {
            dataset_id,
            date: row.date,
            attribute: row.attribute,
            value,
            province_id: region.province_id(),
            area_council_id: region.area_council_id(),
            metadata: row.metadata,
        })
        .await?;
    Ok(id)
}

// =============================================================================
// WIDE FORMAT
// =============================================================================

/// Column 1 names the region; every later column with a header is an
/// attribute. Each non-blank cell becomes one item dated January 1st of `year`.
pub async fn import_wide<S>(store: &S, dataset_id: Uuid, table: &Table, year: i32) -> Result<ImportSummary, ImportError>
where
    S: CatalogStore + ?Sized,
{
    let year = check_year(year)?;
    let date = NaiveDate::from_ymd_opt(year, 1, 1).ok_or(ImportError::InvalidYear(year))?;
    let value_columns: Vec<(usize, &str)> = table
        .headers
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, h)| (i, h.trim()))
        .filter(|(_, h)| !h.is_empty())
        .collect();

    let mut summary = ImportSummary::default();
    for (position, row) in table.rows.iter().enumerate() {
        let region_text = row.first().map(|c| c.trim()).unwrap_or("");
        let region = match resolve(store, region_text).await {
            Ok(region) => region,
            Err(e) => {
                summary.record_error(position + 1, &e);
                continue;
            }
        };

        for &(column, attribute) in &value_columns {
            let cell = row.get(column).map(|c| c.trim()).unwrap_or("");
            if cell.is_empty() {
                continue;
            }
            let value = match parse_value(cell) {
                Ok(value) => value,
                Err(e) => {
                    summary.record_error(position + 1, &e);
                    continue;
                }
            };
            let mut metadata = Metadata::new();
            metadata.insert("region".to_string(), Value::String(region_text.to_string()));
            let item = NewTabularItem {
                dataset_id,
                date: Some(date),
                attribute: Some(attribute.to_string()),
                value,
                province_id: region.province_id(),
                area_council_id: region.area_council_id(),
                metadata,
            };
            match store.create_tabular_item(item).await {
                Ok(_) => summary.record_created(),
                Err(e) => summary.record_error(position + 1, &e),
            }
        }
    }
    Ok(summary)
}

// =============================================================================
// GEOJSON
// =============================================================================

pub async fn import_geojson<S>(store: &S, dataset_id: Uuid, features: Vec<RawFeature>) -> ImportSummary
where
    S: CatalogStore + ?Sized,
{
    let mut summary = ImportSummary::default();
    for (position, feature) in features.into_iter().enumerate() {
        match import_feature(store, dataset_id, feature).await {
            Ok(_) => summary.record_created(),
            Err(e) => summary.record_error(position + 1, &e),
        }
    }
    summary
}

async fn import_feature<S>(store: &S, dataset_id: Uuid, feature: RawFeature) -> Result<Uuid, RowError>
where
    S: CatalogStore + ?Sized,
{
    let row = FeatureRow::from_properties(feature.properties);
    let geometry = feature_geometry(feature.geometry)?;
    let region = resolve_named(store, &row.province, &row.area_council).await?;
    let id = store
        .create_vector_item(NewVectorItem {
            dataset_id,
            name: row.name,
            reference: row.reference,
            attribute: row.attribute,
            province_id: region.province_id(),
            area_council_id: region.area_council_id(),
            geometry,
            metadata: row.metadata,
        })
        .await?;
    Ok(id)
}

pub(crate) fn feature_geometry(geometry: Option<Value>) -> Result<geojson::Geometry, RowError> {
    let geometry = geometry.ok_or_else(|| RowError::Geometry("feature has no geometry".to_string()))?;
    serde_json::from_value(geometry).map_err(|e| RowError::Geometry(e.to_string()))
}

// =============================================================================
// FILES
// =============================================================================

/// Decode one uploaded file and import it into `dataset_id`.
pub async fn import_file<S>(
    store: &S,
    dataset_id: Uuid,
    file_name: &str,
    bytes: &[u8],
    format: ImportFormat,
    year: i32,
) -> Result<ImportSummary, ImportError>
where
    S: CatalogStore + ?Sized,
{
    let kind = format.dataset_kind();
    let dataset = store
        .get_dataset(kind, dataset_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} dataset {}", kind.as_str(), dataset_id)))?;

    let summary = match format {
        ImportFormat::Long => {
            let table = read_table(file_name, bytes)?;
            import_long(store, dataset.id, table.records()).await
        }
        ImportFormat::Wide => {
            let table = read_table(file_name, bytes)?;
            import_wide(store, dataset.id, &table, year).await?
        }
        ImportFormat::GeoJson => {
            ensure_geojson_name(file_name)?;
            let features = read_features(bytes)?;
            import_geojson(store, dataset.id, features).await
        }
    };

    info!(
        file = file_name,
        dataset = %dataset.name,
        created = summary.created,
        errors = summary.errors,
        "import finished"
    );
    Ok(summary)
}

/// One (file, dataset) pair of a multi-file upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub dataset_id: Uuid,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    #[serde(flatten)]
    pub summary: ImportSummary,
    pub messages: Vec<StatusMessage>,
}

/// Import every upload, reporting per-file failures without stopping.
///
/// Only an out-of-range year rejects the whole request.
pub async fn import_batch<S>(store: &S, uploads: Vec<Upload>, format: ImportFormat, year: i32) -> Result<BatchReport, ImportError>
where
    S: CatalogStore + ?Sized,
{
    if format == ImportFormat::Wide {
        check_year(year)?;
    }

    let mut report = BatchReport::default();
    if uploads.is_empty() {
        report.messages.push(StatusMessage::error(
            "Please add at least one file and select a dataset for it.",
        ));
        return Ok(report);
    }

    for upload in uploads {
        match import_file(store, upload.dataset_id, &upload.file_name, &upload.bytes, format, year).await {
            Ok(summary) => report.summary.merge(summary),
            Err(e) => {
                warn!(file = %upload.file_name, error = %e, "file rejected");
                report.messages.push(StatusMessage::error(file_error_text(&upload.file_name, format, &e)));
            }
        }
    }
    report.messages.extend(report.summary.messages());
    Ok(report)
}

fn file_error_text(file_name: &str, format: ImportFormat, err: &ImportError) -> String {
    match (format, err) {
        (_, ImportError::NotTabular(_)) | (_, ImportError::NotGeoJson(_)) => err.to_string(),
        (ImportFormat::GeoJson, _) => format!("Error processing GeoJSON: {}", err),
        _ => format!("Error processing '{}': {}", file_name, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetType, NewDataset};
    use crate::query::ItemFilter;
    use crate::regions::tests::torba_store;
    use crate::store::MemoryStore;
    use crate::upload::read_csv;
    use serde_json::json;

    async fn tabular_dataset(store: &MemoryStore) -> Uuid {
        let (cluster, _) = store.find_or_create_cluster("Administrative").await.unwrap();
        store
            .create_dataset(NewDataset::tabular("Population", cluster.id, DatasetType::Baseline))
            .await
            .unwrap()
            .id
    }

    async fn vector_dataset(store: &MemoryStore) -> Uuid {
        let (cluster, _) = store.find_or_create_cluster("Transportation").await.unwrap();
        store
            .create_dataset(NewDataset::vector("Roads", cluster.id, DatasetType::Baseline))
            .await
            .unwrap()
            .id
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    // -------------------------------------------------------------------------
    // Long format
    // -------------------------------------------------------------------------

    const LONG_CSV: &str = "\
Province,Area Council,Indicator,Value,Year,Month,Unit,Other
Torba,East Gaua,Population,\"1,154\",2024,January,people,x
Sanma,,Population,20,2022,May,people,
,,Population,5,2025,,people,y
";

    #[tokio::test]
    async fn test_long_import_fixture() {
        let store = torba_store().await;
        let dataset_id = tabular_dataset(&store).await;
        let table = read_csv(LONG_CSV.as_bytes()).unwrap();

        let summary = import_long(&store, dataset_id, table.records()).await;
        assert_eq!(summary, ImportSummary { created: 3, errors: 0, first_error: None });

        let items = store
            .tabular_items(dataset_id, &ItemFilter::default(), None)
            .await
            .unwrap()
            .results;
        assert_eq!(items.len(), 3);

        assert_eq!(items[0].value, 1154.0);
        assert_eq!(items[0].date, date(2024, 1, 1));
        assert_eq!(items[0].attribute.as_deref(), Some("Population"));
        assert_eq!(items[0].province.as_ref().unwrap().name, "Torba");
        assert_eq!(items[0].area_council.as_ref().unwrap().name, "East Gaua");
        assert_eq!(json!(items[0].metadata), json!({"Other": "x"}));

        assert_eq!(items[1].date, date(2022, 5, 1));
        assert_eq!(items[1].province.as_ref().unwrap().name, "Sanma");
        assert!(items[1].area_council.is_none());
        assert!(items[1].metadata.is_empty());

        assert_eq!(items[2].date, date(2025, 1, 1));
        assert!(items[2].province.is_none());
        assert!(items[2].area_council.is_none());
    }

    #[tokio::test]
    async fn test_long_import_isolates_bad_rows() {
        let store = torba_store().await;
        let dataset_id = tabular_dataset(&store).await;
        let csv = "Province,Value\nTorba,n/a\nTorba,12\nTorba,abc\n";
        let table = read_csv(csv.as_bytes()).unwrap();

        let summary = import_long(&store, dataset_id, table.records()).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.first_error.as_deref(), Some("Cannot parse value: 'n/a'"));
    }

    #[tokio::test]
    async fn test_storage_failure_is_a_row_error() {
        let store = torba_store().await;
        let table = read_csv(b"Province,Value\nTorba,1\nTorba,2\n").unwrap();

        let summary = import_long(&store, Uuid::new_v4(), table.records()).await;
        assert_eq!(summary.created, 0);
        assert_eq!(summary.errors, 2);
        assert!(summary.first_error.unwrap().starts_with("constraint violation"));
    }

    // -------------------------------------------------------------------------
    // Wide format
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_wide_import_skips_blank_cells() {
        let store = torba_store().await;
        let dataset_id = tabular_dataset(&store).await;
        let table = read_csv(b"Region,A,B\nTORBA,10,  \n").unwrap();

        let summary = import_wide(&store, dataset_id, &table, DEFAULT_YEAR).await.unwrap();
        assert_eq!(summary, ImportSummary { created: 1, errors: 0, first_error: None });

        let items = store
            .tabular_items(dataset_id, &ItemFilter::default(), None)
            .await
            .unwrap()
            .results;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].date, date(2024, 1, 1));
        assert_eq!(items[0].attribute.as_deref(), Some("A"));
        assert_eq!(items[0].value, 10.0);
        assert_eq!(items[0].province.as_ref().unwrap().name, "Torba");
        assert_eq!(json!(items[0].metadata), json!({"region": "TORBA"}));
    }

    #[tokio::test]
    async fn test_wide_import_treats_every_later_column_as_value() {
        let store = torba_store().await;
        let dataset_id = tabular_dataset(&store).await;
        let table = read_csv(b"Region,Region,,C\nEast Gaua,5,7,x\nNowhere,1,,2\n").unwrap();

        let summary = import_wide(&store, dataset_id, &table, 2020).await.unwrap();
        assert_eq!(summary.created, 3);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.first_error.as_deref(), Some("Cannot convert to number: 'x'"));

        let items = store
            .tabular_items(dataset_id, &ItemFilter::default(), None)
            .await
            .unwrap()
            .results;
        assert_eq!(items[0].attribute.as_deref(), Some("Region"));
        assert_eq!(items[0].area_council.as_ref().unwrap().name, "East Gaua");
        assert_eq!(items[0].province.as_ref().unwrap().name, "Torba");
        assert!(items[2].province.is_none());
        assert_eq!(items[2].date, date(2020, 1, 1));
    }

    #[tokio::test]
    async fn test_wide_import_rejects_year_out_of_range() {
        let store = MemoryStore::new();
        let table = read_csv(b"Region,A\nTorba,1\n").unwrap();
        let err = import_wide(&store, Uuid::new_v4(), &table, 1899).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidYear(1899)));
        assert!(check_year(2100).is_ok());
    }

    // -------------------------------------------------------------------------
    // GeoJSON
    // -------------------------------------------------------------------------

    fn collection() -> Vec<u8> {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"Area Council": "East Gaua", "AC_NAME": "West Gaua", "Name": " School ", "PID": 4},
                    "geometry": {"type": "Point", "coordinates": [167.5, -13.5]}
                },
                {
                    "type": "Feature",
                    "properties": {"Pname": "sanma", "ref": "R1", "count": 0, "open": false, "lanes": 2, "note": "null", "tags": []},
                    "geometry": {"type": "LineString", "coordinates": [[166.0, -15.0], [167.0, -15.5]]}
                },
                {"type": "Feature", "properties": {"Name": "no shape"}, "geometry": null},
                {"type": "Feature", "properties": {}, "geometry": {"type": "Polygon", "coordinates": "bad"}}
            ]
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_geojson_import() {
        let store = torba_store().await;
        let dataset_id = vector_dataset(&store).await;

        let summary = import_file(&store, dataset_id, "roads.geojson", &collection(), ImportFormat::GeoJson, DEFAULT_YEAR)
            .await
            .unwrap();
        assert_eq!(summary.created, 2);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.first_error.as_deref(), Some("Invalid geometry: feature has no geometry"));

        let items = store
            .vector_items(dataset_id, &ItemFilter::default(), None)
            .await
            .unwrap()
            .results;
        assert_eq!(items[0].area_council.as_ref().unwrap().name, "East Gaua");
        assert_eq!(items[0].name.as_deref(), Some("School"));
        assert_eq!(json!(items[0].metadata), json!({"AC_NAME": "West Gaua"}));

        assert_eq!(items[1].province.as_ref().unwrap().name, "Sanma");
        assert_eq!(items[1].reference.as_deref(), Some("R1"));
        assert_eq!(json!(items[1].metadata), json!({"lanes": 2}));
    }

    #[tokio::test]
    async fn test_geojson_requires_extension() {
        let store = torba_store().await;
        let dataset_id = vector_dataset(&store).await;
        let err = import_file(&store, dataset_id, "roads.json", &collection(), ImportFormat::GeoJson, DEFAULT_YEAR)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::NotGeoJson(_)));
    }

    // -------------------------------------------------------------------------
    // Files and batches
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_import_file_requires_dataset_of_format_kind() {
        let store = torba_store().await;
        let vector_id = vector_dataset(&store).await;
        let err = import_file(&store, vector_id, "a.csv", b"Value\n1\n", ImportFormat::Long, DEFAULT_YEAR)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_batch_merges_files_and_reports_rejected_ones() {
        let store = torba_store().await;
        let dataset_id = tabular_dataset(&store).await;
        let uploads = vec![
            Upload { file_name: "a.csv".into(), dataset_id, bytes: b"Province,Value\nTorba,1\nTorba,-\n".to_vec() },
            Upload { file_name: "b.txt".into(), dataset_id, bytes: b"Value\n1\n".to_vec() },
            Upload { file_name: "c.csv".into(), dataset_id, bytes: vec![0xff, 0xfe, 0x00] },
            Upload { file_name: "d.csv".into(), dataset_id, bytes: b"Value\n2\n3\n".to_vec() },
        ];

        let report = import_batch(&store, uploads, ImportFormat::Long, DEFAULT_YEAR).await.unwrap();
        assert_eq!(report.summary.created, 3);
        assert_eq!(report.summary.errors, 1);
        let texts: Vec<&str> = report.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "'b.txt' is not a CSV file. Only CSV files are accepted.",
                "Error processing 'c.csv': file is not valid UTF-8 text",
                "Successfully created 3 new records",
                "Failed to create 1 items. First error: Cannot parse value: '-'",
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_rejects_invalid_year_before_importing() {
        let store = torba_store().await;
        let dataset_id = tabular_dataset(&store).await;
        let uploads = vec![Upload { file_name: "a.csv".into(), dataset_id, bytes: b"Region,A\nTorba,1\n".to_vec() }];
        let err = import_batch(&store, uploads, ImportFormat::Wide, 2101).await.unwrap_err();
        assert!(matches!(err, ImportError::InvalidYear(2101)));
        assert_eq!(store.tabular_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let store = MemoryStore::new();
        let report = import_batch(&store, Vec::new(), ImportFormat::Long, DEFAULT_YEAR).await.unwrap();
        assert_eq!(report.messages[0].level, MessageLevel::Error);
    }

    #[test]
    fn test_summary_merge_keeps_first_error() {
        let mut total = ImportSummary { created: 1, errors: 0, first_error: None };
        total.merge(ImportSummary { created: 2, errors: 1, first_error: Some("first".into()) });
        total.merge(ImportSummary { created: 0, errors: 1, first_error: Some("second".into()) });
        assert_eq!(total, ImportSummary { created: 3, errors: 2, first_error: Some("first".into()) });
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("Wide".parse::<ImportFormat>().unwrap(), ImportFormat::Wide);
        assert_eq!("geojson".parse::<ImportFormat>().unwrap(), ImportFormat::GeoJson);
        assert!("tall".parse::<ImportFormat>().is_err());
    }
}
