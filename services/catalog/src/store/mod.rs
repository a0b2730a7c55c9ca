//! Storage capabilities consumed by the import pipeline and the read API.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{
    AreaCouncil, Cluster, Dataset, DatasetKind, DatasetType, NewDataset, NewTabularItem,
    NewVectorItem, Province, RegionLevel, RegionShape, TabularItem, VectorItem,
};
use crate::query::{DatasetFilter, ItemFilter, Page, PageRequest};

/// Item counts by region specificity for one tabular dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionCoverage {
    pub total: u64,
    pub with_province: u64,
    pub with_area_council: u64,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Regions
    // -------------------------------------------------------------------------

    /// Case-insensitive exact name match.
    async fn find_province(&self, name: &str) -> StoreResult<Option<Province>>;

    /// Case-insensitive exact name match, with the parent province.
    async fn find_area_council(&self, name: &str) -> StoreResult<Option<AreaCouncil>>;

    async fn create_province(&self, name: &str, geometry: &geojson::Geometry) -> StoreResult<Province>;

    async fn create_area_council(
        &self,
        name: &str,
        province_id: Uuid,
        geometry: &geojson::Geometry,
    ) -> StoreResult<AreaCouncil>;

    /// Fails with a constraint violation while area councils reference it.
    async fn delete_province(&self, id: Uuid) -> StoreResult<()>;

    async fn province_shapes(&self) -> StoreResult<Vec<RegionShape>>;

    /// Area councils of the province named `province` (case-insensitive).
    async fn area_council_shapes(&self, province: &str) -> StoreResult<Vec<RegionShape>>;

    // -------------------------------------------------------------------------
    // Clusters
    // -------------------------------------------------------------------------

    async fn list_clusters(&self, page: PageRequest) -> StoreResult<Page<Cluster>>;

    async fn find_cluster(&self, name: &str) -> StoreResult<Option<Cluster>>;

    /// Returns the cluster and whether it was created.
    async fn find_or_create_cluster(&self, name: &str) -> StoreResult<(Cluster, bool)>;

    async fn create_cluster(&self, name: &str, order: i32) -> StoreResult<Cluster>;

    /// Fails with a constraint violation while datasets reference it.
    async fn delete_cluster(&self, id: Uuid) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Datasets
    // -------------------------------------------------------------------------

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset>;

    async fn get_dataset(&self, kind: DatasetKind, id: Uuid) -> StoreResult<Option<Dataset>>;

    /// Exact (name, type, cluster name) lookup; cluster name is case-sensitive.
    async fn find_dataset(
        &self,
        kind: DatasetKind,
        name: &str,
        dataset_type: DatasetType,
        cluster: &str,
    ) -> StoreResult<Option<Dataset>>;

    async fn list_datasets(
        &self,
        kind: DatasetKind,
        filter: &DatasetFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Dataset>>;

    // -------------------------------------------------------------------------
    // Items
    // -------------------------------------------------------------------------

    async fn create_tabular_item(&self, item: NewTabularItem) -> StoreResult<Uuid>;

    async fn create_vector_item(&self, item: NewVectorItem) -> StoreResult<Uuid>;

    async fn tabular_items(
        &self,
        dataset_id: Uuid,
        filter: &ItemFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<TabularItem>>;

    async fn vector_items(
        &self,
        dataset_id: Uuid,
        filter: &ItemFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<VectorItem>>;

    async fn tabular_coverage(&self, dataset_id: Uuid) -> StoreResult<RegionCoverage>;

    /// Delete the dataset's items lacking a reference at `level`.
    async fn delete_tabular_items_without(&self, dataset_id: Uuid, level: RegionLevel) -> StoreResult<u64>;
}
