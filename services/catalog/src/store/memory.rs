//! In-memory store used by tests and dry runs.
//!
//! Mirrors the constraints of the PostgreSQL schema (unique names, protected
//! references) so pipeline behaviour is the same against either backend.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{CatalogStore, RegionCoverage};
use crate::cache::{Hooks, InvalidationHook};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    AreaCouncil, Cluster, Dataset, DatasetKind, DatasetType, NewDataset, NewTabularItem,
    NewVectorItem, Province, RegionLevel, RegionLink, RegionShape, TabularItem, VectorItem,
};
use crate::query::{contains_ci, eq_ci, DatasetFilter, DatasetOrder, ItemFilter, Page, PageRequest};

#[derive(Debug, Clone)]
struct StoredProvince {
    id: Uuid,
    name: String,
    geometry: geojson::Geometry,
}

#[derive(Debug, Clone)]
struct StoredAreaCouncil {
    id: Uuid,
    name: String,
    province_id: Uuid,
    geometry: geojson::Geometry,
}

#[derive(Debug, Clone)]
struct StoredDataset {
    cluster_id: Uuid,
    dataset: Dataset,
}

#[derive(Debug, Default)]
struct Inner {
    provinces: Vec<StoredProvince>,
    area_councils: Vec<StoredAreaCouncil>,
    clusters: Vec<Cluster>,
    datasets: Vec<StoredDataset>,
    tabular: Vec<(Uuid, NewTabularItem)>,
    vector: Vec<(Uuid, NewVectorItem)>,
}

impl Inner {
    fn province(&self, id: Uuid) -> Option<&StoredProvince> {
        self.provinces.iter().find(|p| p.id == id)
    }

    fn area_council(&self, id: Uuid) -> Option<&StoredAreaCouncil> {
        self.area_councils.iter().find(|a| a.id == id)
    }

    fn province_link(&self, id: Option<Uuid>) -> Option<RegionLink> {
        let p = self.province(id?)?;
        Some(RegionLink { id: p.id, name: p.name.clone() })
    }

    fn area_council_link(&self, id: Option<Uuid>) -> Option<RegionLink> {
        let a = self.area_council(id?)?;
        Some(RegionLink { id: a.id, name: a.name.clone() })
    }

    fn dataset_of_kind(&self, id: Uuid, kind: DatasetKind) -> StoreResult<()> {
        match self.datasets.iter().find(|d| d.dataset.id == id) {
            Some(d) if d.dataset.kind == kind => Ok(()),
            _ => Err(StoreError::Constraint(format!(
                "{} dataset {} does not exist",
                kind.as_str(),
                id
            ))),
        }
    }

    fn check_regions(&self, province_id: Option<Uuid>, area_council_id: Option<Uuid>) -> StoreResult<()> {
        if let Some(id) = province_id {
            if self.province(id).is_none() {
                return Err(StoreError::Constraint(format!("province {} does not exist", id)));
            }
        }
        if let Some(id) = area_council_id {
            if self.area_council(id).is_none() {
                return Err(StoreError::Constraint(format!("area council {} does not exist", id)));
            }
        }
        Ok(())
    }

    fn regions_match(&self, province_id: Option<Uuid>, area_council_id: Option<Uuid>, filter: &ItemFilter) -> bool {
        if let Some(name) = &filter.province {
            let province = self.province_link(province_id);
            if !eq_ci(province.as_ref().map(|p| p.name.as_str()), name) {
                return false;
            }
        }
        if let Some(name) = &filter.area_council {
            let council = self.area_council_link(area_council_id);
            if !eq_ci(council.as_ref().map(|a| a.name.as_str()), name) {
                return false;
            }
        }
        true
    }

    fn tabular_item(&self, id: Uuid, item: &NewTabularItem) -> TabularItem {
        TabularItem {
            id,
            dataset_id: item.dataset_id,
            date: item.date,
            attribute: item.attribute.clone(),
            value: item.value,
            province: self.province_link(item.province_id),
            area_council: self.area_council_link(item.area_council_id),
            metadata: item.metadata.clone(),
        }
    }

    fn vector_item(&self, id: Uuid, item: &NewVectorItem) -> VectorItem {
        VectorItem {
            id,
            dataset_id: item.dataset_id,
            name: item.name.clone(),
            reference: item.reference.clone(),
            attribute: item.attribute.clone(),
            province: self.province_link(item.province_id),
            area_council: self.area_council_link(item.area_council_id),
            geometry: item.geometry.clone(),
            metadata: item.metadata.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    hooks: Hooks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every cluster create/delete.
    pub fn register_hook(&self, hook: Arc<dyn InvalidationHook>) {
        self.hooks.register(hook);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tabular_count(&self) -> usize {
        self.lock().tabular.len()
    }

    pub fn vector_count(&self) -> usize {
        self.lock().vector.len()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_province(&self, name: &str) -> StoreResult<Option<Province>> {
        let inner = self.lock();
        Ok(inner
            .provinces
            .iter()
            .find(|p| p.name.to_lowercase() == name.to_lowercase())
            .map(|p| Province { id: p.id, name: p.name.clone() }))
    }

    async fn find_area_council(&self, name: &str) -> StoreResult<Option<AreaCouncil>> {
        let inner = self.lock();
        let Some(council) = inner
            .area_councils
            .iter()
            .find(|a| a.name.to_lowercase() == name.to_lowercase())
        else {
            return Ok(None);
        };
        let province = inner
            .province(council.province_id)
            .ok_or_else(|| StoreError::NotFound(format!("province {}", council.province_id)))?;
        Ok(Some(AreaCouncil {
            id: council.id,
            name: council.name.clone(),
            province: Province { id: province.id, name: province.name.clone() },
        }))
    }

    async fn create_province(&self, name: &str, geometry: &geojson::Geometry) -> StoreResult<Province> {
        let mut inner = self.lock();
        if inner.provinces.iter().any(|p| p.name == name) {
            return Err(StoreError::Constraint(format!("province '{}' already exists", name)));
        }
        let stored = StoredProvince {
            id: Uuid::new_v4(),
            name: name.to_string(),
            geometry: geometry.clone(),
        };
        let province = Province { id: stored.id, name: stored.name.clone() };
        inner.provinces.push(stored);
        inner.provinces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(province)
    }

    async fn create_area_council(
        &self,
        name: &str,
        province_id: Uuid,
        geometry: &geojson::Geometry,
    ) -> StoreResult<AreaCouncil> {
        let mut inner = self.lock();
        if inner.area_councils.iter().any(|a| a.name == name) {
            return Err(StoreError::Constraint(format!("area council '{}' already exists", name)));
        }
        let province = inner
            .province(province_id)
            .map(|p| Province { id: p.id, name: p.name.clone() })
            .ok_or_else(|| StoreError::Constraint(format!("province {} does not exist", province_id)))?;
        let stored = StoredAreaCouncil {
            id: Uuid::new_v4(),
            name: name.to_string(),
            province_id,
            geometry: geometry.clone(),
        };
        let council = AreaCouncil { id: stored.id, name: stored.name.clone(), province };
        inner.area_councils.push(stored);
        inner.area_councils.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(council)
    }

    async fn delete_province(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let referenced = inner.area_councils.iter().any(|a| a.province_id == id)
            || inner.tabular.iter().any(|(_, t)| t.province_id == Some(id))
            || inner.vector.iter().any(|(_, v)| v.province_id == Some(id));
        if referenced {
            return Err(StoreError::Constraint(format!("province {} is still referenced", id)));
        }
        let before = inner.provinces.len();
        inner.provinces.retain(|p| p.id != id);
        if inner.provinces.len() == before {
            return Err(StoreError::NotFound(format!("province {}", id)));
        }
        Ok(())
    }

    async fn province_shapes(&self) -> StoreResult<Vec<RegionShape>> {
        let inner = self.lock();
        Ok(inner
            .provinces
            .iter()
            .map(|p| RegionShape {
                id: p.id,
                name: p.name.clone(),
                province: None,
                geometry: p.geometry.clone(),
            })
            .collect())
    }

    async fn area_council_shapes(&self, province: &str) -> StoreResult<Vec<RegionShape>> {
        let inner = self.lock();
        Ok(inner
            .area_councils
            .iter()
            .filter_map(|a| {
                let parent = inner.province(a.province_id)?;
                if parent.name.to_lowercase() != province.to_lowercase() {
                    return None;
                }
                Some(RegionShape {
                    id: a.id,
                    name: a.name.clone(),
                    province: Some(parent.name.clone()),
                    geometry: a.geometry.clone(),
                })
            })
            .collect())
    }

    async fn list_clusters(&self, page: PageRequest) -> StoreResult<Page<Cluster>> {
        let mut clusters = self.lock().clusters.clone();
        clusters.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        Ok(page.apply(clusters))
    }

    async fn find_cluster(&self, name: &str) -> StoreResult<Option<Cluster>> {
        Ok(self
            .lock()
            .clusters
            .iter()
            .find(|c| c.name.to_lowercase() == name.to_lowercase())
            .cloned())
    }

    async fn find_or_create_cluster(&self, name: &str) -> StoreResult<(Cluster, bool)> {
        {
            let inner = self.lock();
            if let Some(cluster) = inner.clusters.iter().find(|c| c.name == name) {
                return Ok((cluster.clone(), false));
            }
        }
        let cluster = self.create_cluster(name, 0).await?;
        Ok((cluster, true))
    }

    async fn create_cluster(&self, name: &str, order: i32) -> StoreResult<Cluster> {
        let cluster = {
            let mut inner = self.lock();
            if inner.clusters.iter().any(|c| c.name == name) {
                return Err(StoreError::Constraint(format!("cluster '{}' already exists", name)));
            }
            let cluster = Cluster { id: Uuid::new_v4(), name: name.to_string(), order };
            inner.clusters.push(cluster.clone());
            cluster
        };
        self.hooks.fire();
        Ok(cluster)
    }

    async fn delete_cluster(&self, id: Uuid) -> StoreResult<()> {
        {
            let mut inner = self.lock();
            if inner.datasets.iter().any(|d| d.cluster_id == id) {
                return Err(StoreError::Constraint(format!("cluster {} still has datasets", id)));
            }
            let before = inner.clusters.len();
            inner.clusters.retain(|c| c.id != id);
            if inner.clusters.len() == before {
                return Err(StoreError::NotFound(format!("cluster {}", id)));
            }
        }
        self.hooks.fire();
        Ok(())
    }

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset> {
        let mut inner = self.lock();
        let cluster = inner
            .clusters
            .iter()
            .find(|c| c.id == dataset.cluster_id)
            .cloned()
            .ok_or_else(|| StoreError::Constraint(format!("cluster {} does not exist", dataset.cluster_id)))?;
        let duplicate = inner.datasets.iter().any(|d| {
            d.dataset.kind == dataset.kind
                && d.dataset.name == dataset.name
                && d.dataset.dataset_type == dataset.dataset_type
                && d.cluster_id == dataset.cluster_id
        });
        if duplicate {
            return Err(StoreError::Constraint(format!(
                "{} dataset '{}' ({}) already exists in cluster '{}'",
                dataset.kind.as_str(),
                dataset.name,
                dataset.dataset_type,
                cluster.name
            )));
        }
        let now = Utc::now();
        let created = Dataset {
            id: Uuid::new_v4(),
            kind: dataset.kind,
            name: dataset.name,
            description: dataset.description,
            created: now,
            updated: now,
            cluster: cluster.name,
            dataset_type: dataset.dataset_type,
            source: dataset.source,
            unit: dataset.unit,
            filename_id: dataset.filename_id,
            titiler_url_params: dataset.titiler_url_params,
            url: dataset.url,
            source_layer: dataset.source_layer,
        };
        inner.datasets.push(StoredDataset {
            cluster_id: dataset.cluster_id,
            dataset: created.clone(),
        });
        Ok(created)
    }

    async fn get_dataset(&self, kind: DatasetKind, id: Uuid) -> StoreResult<Option<Dataset>> {
        Ok(self
            .lock()
            .datasets
            .iter()
            .find(|d| d.dataset.id == id && d.dataset.kind == kind)
            .map(|d| d.dataset.clone()))
    }

    async fn find_dataset(
        &self,
        kind: DatasetKind,
        name: &str,
        dataset_type: DatasetType,
        cluster: &str,
    ) -> StoreResult<Option<Dataset>> {
        Ok(self
            .lock()
            .datasets
            .iter()
            .find(|d| {
                d.dataset.kind == kind
                    && d.dataset.name == name
                    && d.dataset.dataset_type == dataset_type
                    && d.dataset.cluster == cluster
            })
            .map(|d| d.dataset.clone()))
    }

    async fn list_datasets(
        &self,
        kind: DatasetKind,
        filter: &DatasetFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Dataset>> {
        let mut datasets: Vec<Dataset> = self
            .lock()
            .datasets
            .iter()
            .map(|d| &d.dataset)
            .filter(|d| d.kind == kind)
            .filter(|d| filter.name.as_ref().map_or(true, |n| contains_ci(Some(&d.name), n)))
            .filter(|d| filter.source.as_ref().map_or(true, |s| contains_ci(d.source.as_deref(), s)))
            .filter(|d| filter.dataset_type.map_or(true, |t| d.dataset_type == t))
            .filter(|d| filter.cluster.as_ref().map_or(true, |c| eq_ci(Some(&d.cluster), c)))
            .filter(|d| filter.created_after.map_or(true, |after| d.created.date_naive() >= after))
            .filter(|d| filter.created_before.map_or(true, |before| d.created.date_naive() <= before))
            .cloned()
            .collect();

        if let Some((order, descending)) = filter.order {
            datasets.sort_by(|a, b| {
                let ordering = match order {
                    DatasetOrder::Name => a.name.cmp(&b.name),
                    DatasetOrder::Id => a.id.cmp(&b.id),
                    DatasetOrder::Created => a.created.cmp(&b.created),
                    DatasetOrder::Updated => a.updated.cmp(&b.updated),
                };
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        Ok(match page {
            Some(page) => page.apply(datasets),
            None => Page { count: datasets.len() as u64, results: datasets },
        })
    }

    async fn create_tabular_item(&self, item: NewTabularItem) -> StoreResult<Uuid> {
        let mut inner = self.lock();
        inner.dataset_of_kind(item.dataset_id, DatasetKind::Tabular)?;
        inner.check_regions(item.province_id, item.area_council_id)?;
        let id = Uuid::new_v4();
        inner.tabular.push((id, item));
        Ok(id)
    }

    async fn create_vector_item(&self, item: NewVectorItem) -> StoreResult<Uuid> {
        let mut inner = self.lock();
        inner.dataset_of_kind(item.dataset_id, DatasetKind::Vector)?;
        inner.check_regions(item.province_id, item.area_council_id)?;
        let id = Uuid::new_v4();
        inner.vector.push((id, item));
        Ok(id)
    }

    async fn tabular_items(
        &self,
        dataset_id: Uuid,
        filter: &ItemFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<TabularItem>> {
        let inner = self.lock();
        let items: Vec<TabularItem> = inner
            .tabular
            .iter()
            .filter(|(id, t)| {
                t.dataset_id == dataset_id
                    && filter.id.map_or(true, |wanted| *id == wanted)
                    && filter
                        .attribute
                        .as_ref()
                        .map_or(true, |a| contains_ci(t.attribute.as_deref(), a))
                    && filter.date_after.map_or(true, |after| t.date.map_or(false, |d| d >= after))
                    && filter.date_before.map_or(true, |before| t.date.map_or(false, |d| d <= before))
                    && filter.metadata_matches(&t.metadata)
                    && inner.regions_match(t.province_id, t.area_council_id, filter)
            })
            .map(|(id, t)| inner.tabular_item(*id, t))
            .collect();
        Ok(match page {
            Some(page) => page.apply(items),
            None => Page { count: items.len() as u64, results: items },
        })
    }

    async fn vector_items(
        &self,
        dataset_id: Uuid,
        filter: &ItemFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<VectorItem>> {
        let inner = self.lock();
        let items: Vec<VectorItem> = inner
            .vector
            .iter()
            .filter(|(id, v)| {
                v.dataset_id == dataset_id
                    && filter.id.map_or(true, |wanted| *id == wanted)
                    && filter
                        .attribute
                        .as_ref()
                        .map_or(true, |a| contains_ci(v.attribute.as_deref(), a))
                    && filter.name.as_ref().map_or(true, |n| contains_ci(v.name.as_deref(), n))
                    && filter
                        .reference
                        .as_ref()
                        .map_or(true, |r| contains_ci(v.reference.as_deref(), r))
                    && filter.bbox.map_or(true, |bbox| bbox.intersects_geometry(&v.geometry))
                    && filter.metadata_matches(&v.metadata)
                    && inner.regions_match(v.province_id, v.area_council_id, filter)
            })
            .map(|(id, v)| inner.vector_item(*id, v))
            .collect();
        Ok(match page {
            Some(page) => page.apply(items),
            None => Page { count: items.len() as u64, results: items },
        })
    }

    async fn tabular_coverage(&self, dataset_id: Uuid) -> StoreResult<RegionCoverage> {
        let inner = self.lock();
        let mut coverage = RegionCoverage::default();
        for (_, item) in inner.tabular.iter().filter(|(_, t)| t.dataset_id == dataset_id) {
            coverage.total += 1;
            if item.province_id.is_some() {
                coverage.with_province += 1;
            }
            if item.area_council_id.is_some() {
                coverage.with_area_council += 1;
            }
        }
        Ok(coverage)
    }

    async fn delete_tabular_items_without(&self, dataset_id: Uuid, level: RegionLevel) -> StoreResult<u64> {
        let mut inner = self.lock();
        let before = inner.tabular.len();
        inner.tabular.retain(|(_, t)| {
            let missing = match level {
                RegionLevel::Province => t.province_id.is_none(),
                RegionLevel::AreaCouncil => t.area_council_id.is_none(),
            };
            !(t.dataset_id == dataset_id && missing)
        });
        Ok((before - inner.tabular.len()) as u64)
    }
}
