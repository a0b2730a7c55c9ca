use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Leftover key/value data kept on an item, in insertion order.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub name: String,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Province {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaCouncil {
    pub id: Uuid,
    pub name: String,
    pub province: Province,
}

/// A region boundary as returned by the region list endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    pub id: Uuid,
    pub name: String,
    /// Parent province name, set for area councils only.
    pub province: Option<String>,
    pub geometry: geojson::Geometry,
}

/// The dataset tables of the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    #[default]
    Tabular,
    Vector,
    Raster,
    Pmtiles,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 4] = [
        DatasetKind::Tabular,
        DatasetKind::Raster,
        DatasetKind::Vector,
        DatasetKind::Pmtiles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Tabular => "tabular",
            DatasetKind::Vector => "vector",
            DatasetKind::Raster => "raster",
            DatasetKind::Pmtiles => "pmtiles",
        }
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tabular" => Ok(DatasetKind::Tabular),
            "vector" => Ok(DatasetKind::Vector),
            "raster" => Ok(DatasetKind::Raster),
            "pmtiles" => Ok(DatasetKind::Pmtiles),
            other => Err(format!("unknown dataset kind '{}'", other)),
        }
    }
}

/// Dataset type. Stored by key, shown by label in master sheets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    #[default]
    Baseline,
    EstimatedDamage,
    AidResourcesNeeded,
    EstimateFinancialDamage,
}

impl DatasetType {
    pub const ALL: [DatasetType; 4] = [
        DatasetType::Baseline,
        DatasetType::EstimatedDamage,
        DatasetType::AidResourcesNeeded,
        DatasetType::EstimateFinancialDamage,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            DatasetType::Baseline => "baseline",
            DatasetType::EstimatedDamage => "estimated_damage",
            DatasetType::AidResourcesNeeded => "aid_resources_needed",
            DatasetType::EstimateFinancialDamage => "estimate_financial_damage",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DatasetType::Baseline => "Baseline",
            DatasetType::EstimatedDamage => "Estimated Hazard Damage",
            DatasetType::AidResourcesNeeded => "Immediate Response Resources",
            DatasetType::EstimateFinancialDamage => "Estimated Financial Damage",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key().eq_ignore_ascii_case(key.trim()))
    }

    /// Master-sheet label lookup. An empty label means baseline.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.is_empty() {
            return Some(DatasetType::Baseline);
        }
        Self::ALL.into_iter().find(|t| t.label() == label)
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub id: Uuid,
    #[serde(skip)]
    pub kind: DatasetKind,
    pub name: String,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Cluster name.
    pub cluster: String,
    #[serde(rename = "type")]
    pub dataset_type: DatasetType,
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub titiler_url_params: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_layer: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewDataset {
    pub kind: DatasetKind,
    pub name: String,
    pub description: Option<String>,
    pub cluster_id: Uuid,
    pub dataset_type: DatasetType,
    pub source: Option<String>,
    pub unit: Option<String>,
    pub filename_id: Option<String>,
    pub titiler_url_params: Option<String>,
    pub url: Option<String>,
    pub source_layer: Option<String>,
}

impl NewDataset {
    pub fn tabular(name: &str, cluster_id: Uuid, dataset_type: DatasetType) -> Self {
        Self {
            kind: DatasetKind::Tabular,
            name: name.to_string(),
            cluster_id,
            dataset_type,
            ..Default::default()
        }
    }

    pub fn vector(name: &str, cluster_id: Uuid, dataset_type: DatasetType) -> Self {
        Self {
            kind: DatasetKind::Vector,
            ..Self::tabular(name, cluster_id, dataset_type)
        }
    }
}

/// Name reference to a region, as joined onto items.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLink {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularItem {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub date: Option<NaiveDate>,
    pub attribute: Option<String>,
    pub value: f64,
    pub province: Option<RegionLink>,
    pub area_council: Option<RegionLink>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTabularItem {
    pub dataset_id: Uuid,
    pub date: Option<NaiveDate>,
    pub attribute: Option<String>,
    pub value: f64,
    pub province_id: Option<Uuid>,
    pub area_council_id: Option<Uuid>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorItem {
    pub id: Uuid,
    pub dataset_id: Uuid,
    pub name: Option<String>,
    pub reference: Option<String>,
    pub attribute: Option<String>,
    pub province: Option<RegionLink>,
    pub area_council: Option<RegionLink>,
    pub geometry: geojson::Geometry,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewVectorItem {
    pub dataset_id: Uuid,
    pub name: Option<String>,
    pub reference: Option<String>,
    pub attribute: Option<String>,
    pub province_id: Option<Uuid>,
    pub area_council_id: Option<Uuid>,
    pub geometry: geojson::Geometry,
    pub metadata: Metadata,
}

/// Region granularity used by the redundancy cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionLevel {
    Province,
    AreaCouncil,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_type_labels_round_trip_to_keys() {
        assert_eq!(
            DatasetType::from_label("Estimated Hazard Damage"),
            Some(DatasetType::EstimatedDamage)
        );
        assert_eq!(
            DatasetType::from_label("Immediate Response Resources"),
            Some(DatasetType::AidResourcesNeeded)
        );
        assert_eq!(DatasetType::from_label(""), Some(DatasetType::Baseline));
        assert_eq!(DatasetType::from_label("Unknown"), None);
    }

    #[test]
    fn test_dataset_type_key_lookup_ignores_case() {
        assert_eq!(
            DatasetType::from_key("ESTIMATED_DAMAGE"),
            Some(DatasetType::EstimatedDamage)
        );
        assert_eq!(DatasetType::from_key("damage"), None);
    }

    #[test]
    fn test_dataset_serializes_type_key_and_skips_absent_kind_fields() {
        let dataset = Dataset {
            id: Uuid::nil(),
            kind: DatasetKind::Tabular,
            name: "Population".to_string(),
            description: None,
            created: Utc::now(),
            updated: Utc::now(),
            cluster: "Administrative".to_string(),
            dataset_type: DatasetType::EstimatedDamage,
            source: Some("Government".to_string()),
            unit: Some("people".to_string()),
            filename_id: None,
            titiler_url_params: None,
            url: None,
            source_layer: None,
        };
        let json = serde_json::to_value(&dataset).unwrap();
        assert_eq!(json["type"], "estimated_damage");
        assert_eq!(json["unit"], "people");
        assert!(json.get("url").is_none());
        assert!(json.get("kind").is_none());
    }
}
