//! Catalog seeding from master sheets and boundary files.
//!
//! Responsibilities:
//! - Create tabular datasets listed in a master sheet (Indicator/Cluster/Type)
//! - Import master-sheet rows into the dataset each row names
//! - Load province and area council boundaries from GeoJSON

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ImportError, RowError};
use crate::fields::{non_empty, take_field, value_text, Record};
use crate::import::{feature_geometry, import_long, ImportSummary};
use crate::model::{DatasetKind, DatasetType, NewDataset, RegionLevel};
use crate::normalize::{GEO_AREA_COUNCIL, GEO_PROVINCE};
use crate::store::CatalogStore;
use crate::upload::{RawFeature, Table};

/// Master sheet columns, matched exactly.
const INDICATOR: &str = "Indicator";
const CLUSTER: &str = "Cluster";
const TYPE: &str = "Type";
const UNIT: &str = "Unit";
const SOURCE: &str = "Source";

fn cell(record: &Record, key: &str) -> String {
    record.get(key).map(value_text).unwrap_or_default().trim().to_string()
}

fn master_type(label: &str) -> Result<DatasetType, String> {
    DatasetType::from_label(label).ok_or_else(|| format!("unknown dataset type '{}'", label))
}

// =============================================================================
// DATASETS
// =============================================================================

/// Create every (Indicator, Cluster, Type) dataset of the sheet that does not
/// exist yet. Clusters are created on demand. Returns the number created.
pub async fn import_datasets<S>(store: &S, table: &Table) -> Result<usize, ImportError>
where
    S: CatalogStore + ?Sized,
{
    let mut created = 0;
    for record in table.records() {
        let name = cell(&record, INDICATOR);
        let cluster_name = cell(&record, CLUSTER);
        if name.is_empty() || cluster_name.is_empty() {
            continue;
        }
        let dataset_type = master_type(&cell(&record, TYPE)).map_err(ImportError::Format)?;

        if store
            .find_dataset(DatasetKind::Tabular, &name, dataset_type, &cluster_name)
            .await?
            .is_some()
        {
            continue;
        }

        let (cluster, _) = store.find_or_create_cluster(&cluster_name).await?;
        store
            .create_dataset(NewDataset {
                unit: non_empty(&cell(&record, UNIT)),
                source: non_empty(&cell(&record, SOURCE)),
                ..NewDataset::tabular(&name, cluster.id, dataset_type)
            })
            .await?;
        created += 1;
    }
    info!(created, "master datasets imported");
    Ok(created)
}

// =============================================================================
// ITEMS
// =============================================================================

/// Master rows sharing one (Type, Cluster, Indicator) key.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterGroup {
    pub dataset_type: String,
    pub cluster: String,
    pub indicator: String,
    pub rows: Vec<Record>,
}

/// Group rows by their raw (Type, Cluster, Indicator) cells in first-seen order.
pub fn group_by_dataset<I>(records: I) -> Vec<MasterGroup>
where
    I: IntoIterator<Item = Record>,
{
    let mut groups: Vec<MasterGroup> = Vec::new();
    for record in records {
        let key = (cell(&record, TYPE), cell(&record, CLUSTER), cell(&record, INDICATOR));
        match groups
            .iter_mut()
            .find(|g| (&g.dataset_type, &g.cluster, &g.indicator) == (&key.0, &key.1, &key.2))
        {
            Some(group) => group.rows.push(record),
            None => groups.push(MasterGroup {
                dataset_type: key.0,
                cluster: key.1,
                indicator: key.2,
                rows: vec![record],
            }),
        }
    }
    groups
}

async fn master_dataset<S>(store: &S, group: &MasterGroup) -> Result<Uuid, String>
where
    S: CatalogStore + ?Sized,
{
    let dataset_type = master_type(&group.dataset_type)?;
    let (cluster, _) = store
        .find_or_create_cluster(&group.cluster)
        .await
        .map_err(|e| e.to_string())?;
    store
        .find_dataset(DatasetKind::Tabular, &group.indicator, dataset_type, &cluster.name)
        .await
        .map_err(|e| e.to_string())?
        .map(|d| d.id)
        .ok_or_else(|| {
            format!(
                "tabular dataset '{}' ({}) not found in cluster '{}'",
                group.indicator, dataset_type, group.cluster
            )
        })
}

/// Import a master sheet's rows into the datasets they name. A group whose
/// dataset is missing counts each of its rows as an error.
pub async fn import_master_items<S>(store: &S, table: &Table) -> ImportSummary
where
    S: CatalogStore + ?Sized,
{
    let mut total = ImportSummary::default();
    for group in group_by_dataset(table.records()) {
        match master_dataset(store, &group).await {
            Ok(dataset_id) => total.merge(import_long(store, dataset_id, group.rows).await),
            Err(message) => {
                warn!(indicator = %group.indicator, rows = group.rows.len(), "{}", message);
                total.merge(ImportSummary {
                    created: 0,
                    errors: group.rows.len(),
                    first_error: Some(message),
                });
            }
        }
    }
    total
}

// =============================================================================
// REGIONS
// =============================================================================

/// Load boundaries of one level. Area councils name their parent province,
/// which must already exist.
pub async fn import_regions<S>(store: &S, level: RegionLevel, features: Vec<RawFeature>) -> ImportSummary
where
    S: CatalogStore + ?Sized,
{
    let mut summary = ImportSummary::default();
    for feature in features {
        match import_region(store, level, feature).await {
            Ok(()) => summary.created += 1,
            Err(e) => {
                warn!(error = %e, "region rejected");
                summary.errors += 1;
                if summary.first_error.is_none() {
                    summary.first_error = Some(e.to_string());
                }
            }
        }
    }
    summary
}

async fn import_region<S>(store: &S, level: RegionLevel, feature: RawFeature) -> Result<(), RowError>
where
    S: CatalogStore + ?Sized,
{
    let mut properties = feature.properties;
    let geometry = feature_geometry(feature.geometry)?;
    match level {
        RegionLevel::Province => {
            let name = non_empty(&take_field(&mut properties, GEO_PROVINCE))
                .ok_or_else(|| RowError::Invalid("feature has no province name".to_string()))?;
            store.create_province(&name, &geometry).await?;
        }
        RegionLevel::AreaCouncil => {
            let name = non_empty(&take_field(&mut properties, GEO_AREA_COUNCIL))
                .ok_or_else(|| RowError::Invalid("feature has no area council name".to_string()))?;
            let parent = take_field(&mut properties, GEO_PROVINCE);
            let province = store
                .find_province(parent.trim())
                .await?
                .ok_or_else(|| RowError::Invalid(format!("province '{}' not found", parent.trim())))?;
            store.create_area_council(&name, province.id, &geometry).await?;
        }
    }
    Ok(())
}
