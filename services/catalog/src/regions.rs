//! Free-text region lookup against the province / area council tables.
//!
//! Unmatched names are not errors: the reference is simply left empty.

use crate::error::StoreResult;
use crate::model::{AreaCouncil, Province};
use crate::store::CatalogStore;
use uuid::Uuid;

/// Region references resolved for one row. `area_council`, when set, always
/// belongs to `province`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionRef {
    pub province: Option<Province>,
    pub area_council: Option<AreaCouncil>,
}

impl RegionRef {
    pub fn province_id(&self) -> Option<Uuid> {
        self.province.as_ref().map(|p| p.id)
    }

    pub fn area_council_id(&self) -> Option<Uuid> {
        self.area_council.as_ref().map(|a| a.id)
    }

    fn from_area_council(council: AreaCouncil) -> Self {
        Self {
            province: Some(council.province.clone()),
            area_council: Some(council),
        }
    }
}

/// Trimmed lookup text, or `None` for blanks and the `national` marker.
fn lookup_text(text: &str) -> Option<&str> {
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("national") {
        None
    } else {
        Some(text)
    }
}

/// Resolve a single region column. Provinces are tried first, so a province
/// name colliding with an area council name resolves to the province.
pub async fn resolve<S>(store: &S, text: &str) -> StoreResult<RegionRef>
where
    S: CatalogStore + ?Sized,
{
    let Some(name) = lookup_text(text) else {
        return Ok(RegionRef::default());
    };
    if let Some(province) = store.find_province(name).await? {
        return Ok(RegionRef {
            province: Some(province),
            area_council: None,
        });
    }
    Ok(store
        .find_area_council(name)
        .await?
        .map(RegionRef::from_area_council)
        .unwrap_or_default())
}

/// Resolve separate province and area council columns. A matched area council
/// decides the province; otherwise the province column is looked up alone.
pub async fn resolve_named<S>(store: &S, province_text: &str, area_council_text: &str) -> StoreResult<RegionRef>
where
    S: CatalogStore + ?Sized,
{
    if let Some(name) = lookup_text(area_council_text) {
        if let Some(council) = store.find_area_council(name).await? {
            return Ok(RegionRef::from_area_council(council));
        }
    }
    let province = match lookup_text(province_text) {
        Some(name) => store.find_province(name).await?,
        None => None,
    };
    Ok(RegionRef {
        province,
        area_council: None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    pub(crate) fn square() -> geojson::Geometry {
        serde_json::from_value(json!({
            "type": "Polygon",
            "coordinates": [[[167.0, -14.0], [168.0, -14.0], [168.0, -13.0], [167.0, -14.0]]]
        }))
        .unwrap()
    }

    /// Torba province with East Gaua and West Gaua area councils.
    pub(crate) async fn torba_store() -> MemoryStore {
        let store = MemoryStore::new();
        let torba = store.create_province("Torba", &square()).await.unwrap();
        store.create_area_council("East Gaua", torba.id, &square()).await.unwrap();
        store.create_area_council("West Gaua", torba.id, &square()).await.unwrap();
        let sanma = store.create_province("Sanma", &square()).await.unwrap();
        store.create_area_council("Luganville", sanma.id, &square()).await.unwrap();
        store
    }

    // -------------------------------------------------------------------------
    // resolve
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_resolve_province_name() {
        let store = torba_store().await;
        let region = resolve(&store, "TORBA").await.unwrap();
        assert_eq!(region.province.unwrap().name, "Torba");
        assert!(region.area_council.is_none());
    }

    #[tokio::test]
    async fn test_resolve_area_council_derives_province() {
        let store = torba_store().await;
        let region = resolve(&store, "East Gaua").await.unwrap();
        assert_eq!(region.province.unwrap().name, "Torba");
        assert_eq!(region.area_council.unwrap().name, "East Gaua");
    }

    #[tokio::test]
    async fn test_resolve_unknown_and_national_are_empty() {
        let store = torba_store().await;
        assert_eq!(resolve(&store, "Nowhere").await.unwrap(), RegionRef::default());
        assert_eq!(resolve(&store, "National").await.unwrap(), RegionRef::default());
        assert_eq!(resolve(&store, "   ").await.unwrap(), RegionRef::default());
    }

    #[tokio::test]
    async fn test_resolve_prefers_province_on_name_collision() {
        let store = torba_store().await;
        let sanma = store.find_province("Sanma").await.unwrap().unwrap();
        store.create_area_council("Torba", sanma.id, &square()).await.unwrap();

        let region = resolve(&store, "torba").await.unwrap();
        assert_eq!(region.province.unwrap().name, "Torba");
        assert!(region.area_council.is_none());
    }

    // -------------------------------------------------------------------------
    // resolve_named
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_resolve_named_area_council_wins_over_province_text() {
        let store = torba_store().await;
        let region = resolve_named(&store, "Sanma", "east gaua").await.unwrap();
        assert_eq!(region.province.unwrap().name, "Torba");
        assert_eq!(region.area_council.unwrap().name, "East Gaua");
    }

    #[tokio::test]
    async fn test_resolve_named_falls_back_to_province() {
        let store = torba_store().await;
        let region = resolve_named(&store, " sanma ", "Unknown Council").await.unwrap();
        assert_eq!(region.province.unwrap().name, "Sanma");
        assert!(region.area_council.is_none());
    }

    #[tokio::test]
    async fn test_resolve_named_blank_columns() {
        let store = torba_store().await;
        let region = resolve_named(&store, "", "National").await.unwrap();
        assert_eq!(region, RegionRef::default());
    }
}
