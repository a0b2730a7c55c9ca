//! PostgreSQL/PostGIS store.
//!
//! Geometry crosses the wire as GeoJSON text (`ST_GeomFromGeoJSON` on write,
//! `ST_AsGeoJSON` on read) so the crate never links a geometry engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::{CatalogStore, RegionCoverage};
use crate::cache::{Hooks, InvalidationHook};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::model::{
    AreaCouncil, Cluster, Dataset, DatasetKind, DatasetType, Metadata, NewDataset, NewTabularItem,
    NewVectorItem, Province, RegionLevel, RegionLink, RegionShape, TabularItem, VectorItem,
};
use crate::query::{DatasetFilter, ItemFilter, Page, PageRequest};

// =============================================================================
// ROWS
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct DatasetRow {
    id: Uuid,
    kind: String,
    name: String,
    description: Option<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    cluster: String,
    dataset_type: String,
    source: Option<String>,
    unit: Option<String>,
    filename_id: Option<String>,
    titiler_url_params: Option<String>,
    url: Option<String>,
    source_layer: Option<String>,
}

impl DatasetRow {
    fn into_dataset(self, kind: DatasetKind) -> Dataset {
        Dataset {
            id: self.id,
            kind: self.kind.parse().unwrap_or(kind),
            name: self.name,
            description: self.description,
            created: self.created,
            updated: self.updated,
            cluster: self.cluster,
            dataset_type: DatasetType::from_key(&self.dataset_type).unwrap_or_default(),
            source: self.source,
            unit: self.unit,
            filename_id: self.filename_id,
            titiler_url_params: self.titiler_url_params,
            url: self.url,
            source_layer: self.source_layer,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TabularItemRow {
    id: Uuid,
    dataset_id: Uuid,
    date: Option<NaiveDate>,
    attribute: Option<String>,
    value: f64,
    metadata: Json<Metadata>,
    province_id: Option<Uuid>,
    province_name: Option<String>,
    area_council_id: Option<Uuid>,
    area_council_name: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct VectorItemRow {
    id: Uuid,
    dataset_id: Uuid,
    name: Option<String>,
    reference: Option<String>,
    attribute: Option<String>,
    geometry: String,
    metadata: Json<Metadata>,
    province_id: Option<Uuid>,
    province_name: Option<String>,
    area_council_id: Option<Uuid>,
    area_council_name: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ShapeRow {
    id: Uuid,
    name: String,
    province: Option<String>,
    geometry: String,
}

fn link(id: Option<Uuid>, name: Option<String>) -> Option<RegionLink> {
    Some(RegionLink { id: id?, name: name? })
}

fn parse_geometry(raw: &str) -> StoreResult<geojson::Geometry> {
    serde_json::from_str(raw).map_err(|e| StoreError::Geometry(e.to_string()))
}

/// Bound as text and cast to `json` so key order survives (jsonb would sort it).
fn metadata_text(metadata: &Metadata) -> StoreResult<String> {
    serde_json::to_string(metadata).map_err(|e| StoreError::Constraint(e.to_string()))
}

fn geometry_text(geometry: &geojson::Geometry) -> StoreResult<String> {
    serde_json::to_string(geometry).map_err(|e| StoreError::Geometry(e.to_string()))
}

impl ShapeRow {
    fn into_shape(self) -> StoreResult<RegionShape> {
        Ok(RegionShape {
            id: self.id,
            name: self.name,
            province: self.province,
            geometry: parse_geometry(&self.geometry)?,
        })
    }
}

const DATASET_SELECT: &str = r#"
    SELECT d.id, d.kind, d.name, d.description, d.created, d.updated,
           c.name AS cluster, d.type AS dataset_type, d.source, d.unit,
           d.filename_id, d.titiler_url_params, d.url, d.source_layer
    FROM datasets d
    JOIN clusters c ON c.id = d.cluster_id
"#;

const REGION_JOINS: &str = r#"
    LEFT JOIN provinces p ON p.id = i.province_id
    LEFT JOIN area_councils a ON a.id = i.area_council_id
"#;

/// Region and metadata filters shared by both item tables (aliased `i`).
fn push_item_filters(qb: &mut QueryBuilder<'static, Postgres>, dataset_id: Uuid, filter: &ItemFilter) {
    qb.push(" WHERE i.dataset_id = ").push_bind(dataset_id);
    if let Some(id) = filter.id {
        qb.push(" AND i.id = ").push_bind(id);
    }
    if let Some(attribute) = &filter.attribute {
        qb.push(" AND strpos(lower(i.attribute), lower(")
            .push_bind(attribute.clone())
            .push(")) > 0");
    }
    if let Some(province) = &filter.province {
        qb.push(" AND lower(p.name) = lower(").push_bind(province.clone()).push(")");
    }
    if let Some(council) = &filter.area_council {
        qb.push(" AND lower(a.name) = lower(").push_bind(council.clone()).push(")");
    }
    if !filter.metadata.is_empty() {
        qb.push(" AND i.metadata::jsonb @> ")
            .push_bind(Json(filter.metadata_object()))
            .push("::jsonb");
    }
}

fn push_tabular_filters(qb: &mut QueryBuilder<'static, Postgres>, dataset_id: Uuid, filter: &ItemFilter) {
    push_item_filters(qb, dataset_id, filter);
    if let Some(after) = filter.date_after {
        qb.push(" AND i.date >= ").push_bind(after);
    }
    if let Some(before) = filter.date_before {
        qb.push(" AND i.date <= ").push_bind(before);
    }
}

fn push_vector_filters(qb: &mut QueryBuilder<'static, Postgres>, dataset_id: Uuid, filter: &ItemFilter) {
    push_item_filters(qb, dataset_id, filter);
    if let Some(name) = &filter.name {
        qb.push(" AND strpos(lower(i.name), lower(")
            .push_bind(name.clone())
            .push(")) > 0");
    }
    if let Some(reference) = &filter.reference {
        qb.push(" AND strpos(lower(i.reference), lower(")
            .push_bind(reference.clone())
            .push(")) > 0");
    }
    if let Some(bbox) = filter.bbox {
        qb.push(" AND i.geometry && ST_MakeEnvelope(")
            .push_bind(bbox.min_x)
            .push(", ")
            .push_bind(bbox.min_y)
            .push(", ")
            .push_bind(bbox.max_x)
            .push(", ")
            .push_bind(bbox.max_y)
            .push(", 4326)");
    }
}

fn push_dataset_filters(qb: &mut QueryBuilder<'static, Postgres>, kind: DatasetKind, filter: &DatasetFilter) {
    qb.push(" WHERE d.kind = ").push_bind(kind.as_str());
    if let Some(name) = &filter.name {
        qb.push(" AND strpos(lower(d.name), lower(").push_bind(name.clone()).push(")) > 0");
    }
    if let Some(source) = &filter.source {
        qb.push(" AND strpos(lower(d.source), lower(")
            .push_bind(source.clone())
            .push(")) > 0");
    }
    if let Some(dataset_type) = filter.dataset_type {
        qb.push(" AND d.type = ").push_bind(dataset_type.key());
    }
    if let Some(cluster) = &filter.cluster {
        qb.push(" AND lower(c.name) = lower(").push_bind(cluster.clone()).push(")");
    }
    if let Some(after) = filter.created_after {
        qb.push(" AND d.created::date >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        qb.push(" AND d.created::date <= ").push_bind(before);
    }
}

fn push_page(qb: &mut QueryBuilder<'static, Postgres>, page: Option<PageRequest>) {
    if let Some(page) = page {
        qb.push(" LIMIT ")
            .push_bind(page.size as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    hooks: Hooks,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, hooks: Hooks::default() }
    }

    pub async fn connect(config: &Config) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.db_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("catalog schema is up to date");
        Ok(())
    }

    /// Called after every cluster create/delete.
    pub fn register_hook(&self, hook: Arc<dyn InvalidationHook>) {
        self.hooks.register(hook);
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn find_province(&self, name: &str) -> StoreResult<Option<Province>> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, name FROM provinces WHERE lower(name) = lower($1) LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name)| Province { id, name }))
    }

    async fn find_area_council(&self, name: &str) -> StoreResult<Option<AreaCouncil>> {
        let row: Option<(Uuid, String, Uuid, String)> = sqlx::query_as(
            r#"
            SELECT a.id, a.name, p.id, p.name
            FROM area_councils a
            JOIN provinces p ON p.id = a.province_id
            WHERE lower(a.name) = lower($1)
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, province_id, province_name)| AreaCouncil {
            id,
            name,
            province: Province { id: province_id, name: province_name },
        }))
    }

    async fn create_province(&self, name: &str, geometry: &geojson::Geometry) -> StoreResult<Province> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO provinces (id, name, geometry) VALUES ($1, $2, ST_SetSRID(ST_GeomFromGeoJSON($3), 4326))",
        )
        .bind(id)
        .bind(name)
        .bind(geometry_text(geometry)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(Province { id, name: name.to_string() })
    }

    async fn create_area_council(
        &self,
        name: &str,
        province_id: Uuid,
        geometry: &geojson::Geometry,
    ) -> StoreResult<AreaCouncil> {
        let province: Option<(String,)> = sqlx::query_as("SELECT name FROM provinces WHERE id = $1")
            .bind(province_id)
            .fetch_optional(&self.pool)
            .await?;
        let (province_name,) = province
            .ok_or_else(|| StoreError::Constraint(format!("province {} does not exist", province_id)))?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO area_councils (id, name, province_id, geometry)
            VALUES ($1, $2, $3, ST_SetSRID(ST_GeomFromGeoJSON($4), 4326))
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(province_id)
        .bind(geometry_text(geometry)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(AreaCouncil {
            id,
            name: name.to_string(),
            province: Province { id: province_id, name: province_name },
        })
    }

    async fn delete_province(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM provinces WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("province {}", id)));
        }
        Ok(())
    }

    async fn province_shapes(&self) -> StoreResult<Vec<RegionShape>> {
        let rows: Vec<ShapeRow> = sqlx::query_as(
            r#"
            SELECT id, name, NULL::text AS province, ST_AsGeoJSON(geometry) AS geometry
            FROM provinces
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ShapeRow::into_shape).collect()
    }

    async fn area_council_shapes(&self, province: &str) -> StoreResult<Vec<RegionShape>> {
        let rows: Vec<ShapeRow> = sqlx::query_as(
            r#"
            SELECT a.id, a.name, p.name AS province, ST_AsGeoJSON(a.geometry) AS geometry
            FROM area_councils a
            JOIN provinces p ON p.id = a.province_id
            WHERE lower(p.name) = lower($1)
            ORDER BY a.name
            "#,
        )
        .bind(province)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ShapeRow::into_shape).collect()
    }

    async fn list_clusters(&self, page: PageRequest) -> StoreResult<Page<Cluster>> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clusters")
            .fetch_one(&self.pool)
            .await?;
        let rows: Vec<(Uuid, String, i32)> = sqlx::query_as(
            r#"SELECT id, name, "order" FROM clusters ORDER BY "order", name LIMIT $1 OFFSET $2"#,
        )
        .bind(page.size as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(Page {
            count: count as u64,
            results: rows
                .into_iter()
                .map(|(id, name, order)| Cluster { id, name, order })
                .collect(),
        })
    }

    async fn find_cluster(&self, name: &str) -> StoreResult<Option<Cluster>> {
        let row: Option<(Uuid, String, i32)> = sqlx::query_as(
            r#"SELECT id, name, "order" FROM clusters WHERE lower(name) = lower($1) LIMIT 1"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, order)| Cluster { id, name, order }))
    }

    async fn find_or_create_cluster(&self, name: &str) -> StoreResult<(Cluster, bool)> {
        let existing: Option<(Uuid, String, i32)> =
            sqlx::query_as(r#"SELECT id, name, "order" FROM clusters WHERE name = $1"#)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if let Some((id, name, order)) = existing {
            return Ok((Cluster { id, name, order }, false));
        }
        let cluster = self.create_cluster(name, 0).await?;
        Ok((cluster, true))
    }

    async fn create_cluster(&self, name: &str, order: i32) -> StoreResult<Cluster> {
        let id = Uuid::new_v4();
        sqlx::query(r#"INSERT INTO clusters (id, name, "order") VALUES ($1, $2, $3)"#)
            .bind(id)
            .bind(name)
            .bind(order)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        self.hooks.fire();
        Ok(Cluster { id, name: name.to_string(), order })
    }

    async fn delete_cluster(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM clusters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("cluster {}", id)));
        }
        self.hooks.fire();
        Ok(())
    }

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO datasets (id, kind, name, description, cluster_id, type, source, unit,
                                  filename_id, titiler_url_params, url, source_layer)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(id)
        .bind(dataset.kind.as_str())
        .bind(&dataset.name)
        .bind(&dataset.description)
        .bind(dataset.cluster_id)
        .bind(dataset.dataset_type.key())
        .bind(&dataset.source)
        .bind(&dataset.unit)
        .bind(&dataset.filename_id)
        .bind(&dataset.titiler_url_params)
        .bind(&dataset.url)
        .bind(&dataset.source_layer)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        self.get_dataset(dataset.kind, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("dataset {}", id)))
    }

    async fn get_dataset(&self, kind: DatasetKind, id: Uuid) -> StoreResult<Option<Dataset>> {
        let row: Option<DatasetRow> =
            sqlx::query_as(&format!("{} WHERE d.kind = $1 AND d.id = $2", DATASET_SELECT))
                .bind(kind.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.into_dataset(kind)))
    }

    async fn find_dataset(
        &self,
        kind: DatasetKind,
        name: &str,
        dataset_type: DatasetType,
        cluster: &str,
    ) -> StoreResult<Option<Dataset>> {
        let row: Option<DatasetRow> = sqlx::query_as(&format!(
            "{} WHERE d.kind = $1 AND d.name = $2 AND d.type = $3 AND c.name = $4",
            DATASET_SELECT
        ))
        .bind(kind.as_str())
        .bind(name)
        .bind(dataset_type.key())
        .bind(cluster)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into_dataset(kind)))
    }

    async fn list_datasets(
        &self,
        kind: DatasetKind,
        filter: &DatasetFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Dataset>> {
        let mut count_query = QueryBuilder::new(
            "SELECT COUNT(*) FROM datasets d JOIN clusters c ON c.id = d.cluster_id",
        );
        push_dataset_filters(&mut count_query, kind, filter);
        let count: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(DATASET_SELECT);
        push_dataset_filters(&mut query, kind, filter);
        match filter.order {
            Some((order, descending)) => {
                query.push(format!(
                    " ORDER BY d.{} {}",
                    order.column(),
                    if descending { "DESC" } else { "ASC" }
                ));
            }
            None => {
                query.push(" ORDER BY d.created, d.id");
            }
        }
        push_page(&mut query, page);
        let rows: Vec<DatasetRow> = query.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            count: count as u64,
            results: rows.into_iter().map(|r| r.into_dataset(kind)).collect(),
        })
    }

    async fn create_tabular_item(&self, item: NewTabularItem) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO tabular_items (id, dataset_id, date, attribute, value, province_id, area_council_id, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::json)
            "#,
        )
        .bind(id)
        .bind(item.dataset_id)
        .bind(item.date)
        .bind(&item.attribute)
        .bind(item.value)
        .bind(item.province_id)
        .bind(item.area_council_id)
        .bind(metadata_text(&item.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(id)
    }

    async fn create_vector_item(&self, item: NewVectorItem) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO vector_items (id, dataset_id, name, reference, attribute, province_id, area_council_id, geometry, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, ST_SetSRID(ST_GeomFromGeoJSON($8), 4326), $9::json)
            "#,
        )
        .bind(id)
        .bind(item.dataset_id)
        .bind(&item.name)
        .bind(&item.reference)
        .bind(&item.attribute)
        .bind(item.province_id)
        .bind(item.area_council_id)
        .bind(geometry_text(&item.geometry)?)
        .bind(metadata_text(&item.metadata)?)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(id)
    }

    async fn tabular_items(
        &self,
        dataset_id: Uuid,
        filter: &ItemFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<TabularItem>> {
        let mut count_query = QueryBuilder::new(format!("SELECT COUNT(*) FROM tabular_items i {}", REGION_JOINS));
        push_tabular_filters(&mut count_query, dataset_id, filter);
        let count: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(format!(
            r#"
            SELECT i.id, i.dataset_id, i.date, i.attribute, i.value, i.metadata,
                   p.id AS province_id, p.name AS province_name,
                   a.id AS area_council_id, a.name AS area_council_name
            FROM tabular_items i {}
            "#,
            REGION_JOINS
        ));
        push_tabular_filters(&mut query, dataset_id, filter);
        query.push(" ORDER BY i.seq");
        push_page(&mut query, page);
        let rows: Vec<TabularItemRow> = query.build_query_as().fetch_all(&self.pool).await?;

        let results = rows
            .into_iter()
            .map(|r| TabularItem {
                id: r.id,
                dataset_id: r.dataset_id,
                date: r.date,
                attribute: r.attribute,
                value: r.value,
                province: link(r.province_id, r.province_name),
                area_council: link(r.area_council_id, r.area_council_name),
                metadata: r.metadata.0,
            })
            .collect();
        Ok(Page { count: count as u64, results })
    }

    async fn vector_items(
        &self,
        dataset_id: Uuid,
        filter: &ItemFilter,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<VectorItem>> {
        let mut count_query = QueryBuilder::new(format!("SELECT COUNT(*) FROM vector_items i {}", REGION_JOINS));
        push_vector_filters(&mut count_query, dataset_id, filter);
        let count: i64 = count_query.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(format!(
            r#"
            SELECT i.id, i.dataset_id, i.name, i.reference, i.attribute,
                   ST_AsGeoJSON(i.geometry) AS geometry, i.metadata,
                   p.id AS province_id, p.name AS province_name,
                   a.id AS area_council_id, a.name AS area_council_name
            FROM vector_items i {}
            "#,
            REGION_JOINS
        ));
        push_vector_filters(&mut query, dataset_id, filter);
        query.push(" ORDER BY i.seq");
        push_page(&mut query, page);
        let rows: Vec<VectorItemRow> = query.build_query_as().fetch_all(&self.pool).await?;

        let results = rows
            .into_iter()
            .map(|r| {
                Ok(VectorItem {
                    id: r.id,
                    dataset_id: r.dataset_id,
                    name: r.name,
                    reference: r.reference,
                    attribute: r.attribute,
                    province: link(r.province_id, r.province_name),
                    area_council: link(r.area_council_id, r.area_council_name),
                    geometry: parse_geometry(&r.geometry)?,
                    metadata: r.metadata.0,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Page { count: count as u64, results })
    }

    async fn tabular_coverage(&self, dataset_id: Uuid) -> StoreResult<RegionCoverage> {
        let (total, with_province, with_area_council): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(province_id), COUNT(area_council_id)
            FROM tabular_items
            WHERE dataset_id = $1
            "#,
        )
        .bind(dataset_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(RegionCoverage {
            total: total as u64,
            with_province: with_province as u64,
            with_area_council: with_area_council as u64,
        })
    }

    async fn delete_tabular_items_without(&self, dataset_id: Uuid, level: RegionLevel) -> StoreResult<u64> {
        let sql = match level {
            RegionLevel::Province => "DELETE FROM tabular_items WHERE dataset_id = $1 AND province_id IS NULL",
            RegionLevel::AreaCouncil => {
                "DELETE FROM tabular_items WHERE dataset_id = $1 AND area_council_id IS NULL"
            }
        };
        let result = sqlx::query(sql).bind(dataset_id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
