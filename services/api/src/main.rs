//! API Service - Read and import API for the data catalog
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET/POST /cluster, DELETE /cluster/:id - Clusters
//! - GET /datasets?cluster= - Every dataset of one cluster
//! - GET /provinces, /provinces/:province/area-councils - Region boundaries
//! - GET /raster, /pmtiles, /vector, /tabular (+ /:id) - Dataset lists and details
//! - GET /vector/:id/data, /tabular/:id/data, /tabular/:id/data-xlsx - Items
//! - POST /tabular/import, /vector/import - Multipart uploads
//! - POST /tabular/clean - Remove redundant tabular items
//! - POST /cache/clear - Drop cached list responses

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get, post, MethodRouter},
    Json, Router,
};
use catalog::cache::ResponseCache;
use catalog::clean::clean_datasets;
use catalog::export::{export_filename, project, render_xlsx, ExportError};
use catalog::import::{import_batch, BatchReport, ImportFormat, Upload, DEFAULT_YEAR};
use catalog::model::{Cluster, Dataset, DatasetKind, DatasetType, RegionShape, TabularItem, VectorItem};
use catalog::query::{
    parse_metadata_filter, parse_order, BBox, DatasetFilter, ItemFilter, Page, PageRequest, CLUSTER_PAGES,
    DATASET_PAGES, ITEM_PAGES,
};
use catalog::{CatalogStore, Config, ImportError, PgStore, StoreError};
use chrono::NaiveDate;
use geojson::{feature::Id, Feature, FeatureCollection, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const UPLOAD_LIMIT: usize = 64 * 1024 * 1024;

// ============================================================================
// State
// ============================================================================

struct AppState<S> {
    store: Arc<S>,
    cache: Arc<ResponseCache>,
}

type SharedState<S> = State<Arc<AppState<S>>>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(e) => (StatusCode::BAD_REQUEST, e),
            ApiError::NotFound(e) => (StatusCode::NOT_FOUND, e),
            ApiError::Conflict(e) => (StatusCode::CONFLICT, e),
            ApiError::Internal(e) => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e)
            }
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Constraint(_) => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Store(e) => e.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

fn bad_request(err: impl std::fmt::Display) -> ApiError {
    ApiError::BadRequest(err.to_string())
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize, Default)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ClusterDatasetsQuery {
    cluster: Option<String>,
}

#[derive(Deserialize, Default)]
struct DatasetListQuery {
    name: Option<String>,
    source: Option<String>,
    #[serde(rename = "type")]
    dataset_type: Option<String>,
    cluster: Option<String>,
    created_after: Option<NaiveDate>,
    created_before: Option<NaiveDate>,
    order_by: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ItemQuery {
    id: Option<Uuid>,
    attribute: Option<String>,
    province: Option<String>,
    area_council: Option<String>,
    date_after: Option<NaiveDate>,
    date_before: Option<NaiveDate>,
    metadata: Option<String>,
    name: Option<String>,
    #[serde(rename = "ref")]
    reference: Option<String>,
    in_bbox: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Deserialize)]
struct NewClusterRequest {
    name: String,
    #[serde(default)]
    order: i32,
}

#[derive(Deserialize)]
struct CleanRequest {
    datasets: Vec<Uuid>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn dataset_filter<S>(store: &S, params: &DatasetListQuery) -> Result<DatasetFilter, ApiError>
where
    S: CatalogStore + ?Sized,
{
    let dataset_type = match non_blank(&params.dataset_type) {
        Some(raw) => Some(
            DatasetType::from_key(raw).ok_or_else(|| ApiError::BadRequest(format!("unknown dataset type '{}'", raw)))?,
        ),
        None => None,
    };
    let cluster = non_blank(&params.cluster);
    if let Some(name) = cluster {
        if store.find_cluster(name).await?.is_none() {
            return Err(ApiError::BadRequest(format!("unknown cluster '{}'", name)));
        }
    }
    let order = match non_blank(&params.order_by) {
        Some(raw) => Some(parse_order(raw).ok_or_else(|| ApiError::BadRequest(format!("cannot order by '{}'", raw)))?),
        None => None,
    };

    Ok(DatasetFilter {
        name: non_blank(&params.name).map(str::to_string),
        source: non_blank(&params.source).map(str::to_string),
        dataset_type,
        cluster: cluster.map(str::to_string),
        created_after: params.created_after,
        created_before: params.created_before,
        order,
    })
}

/// Region names must exist; an unknown name is a client error rather than an
/// empty result.
async fn item_filter<S>(store: &S, params: &ItemQuery) -> Result<ItemFilter, ApiError>
where
    S: CatalogStore + ?Sized,
{
    let province = non_blank(&params.province);
    if let Some(name) = province {
        if store.find_province(name).await?.is_none() {
            return Err(ApiError::BadRequest(format!("unknown province '{}'", name)));
        }
    }
    let area_council = non_blank(&params.area_council);
    if let Some(name) = area_council {
        if store.find_area_council(name).await?.is_none() {
            return Err(ApiError::BadRequest(format!("unknown area council '{}'", name)));
        }
    }
    let bbox = match non_blank(&params.in_bbox) {
        Some(raw) => Some(BBox::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid in_bbox '{}'", raw)))?),
        None => None,
    };

    Ok(ItemFilter {
        id: params.id,
        attribute: non_blank(&params.attribute).map(str::to_string),
        province: province.map(str::to_string),
        area_council: area_council.map(str::to_string),
        date_after: params.date_after,
        date_before: params.date_before,
        metadata: non_blank(&params.metadata).map(parse_metadata_filter).unwrap_or_default(),
        name: non_blank(&params.name).map(str::to_string),
        reference: non_blank(&params.reference).map(str::to_string),
        bbox,
    })
}

async fn require_dataset<S>(store: &S, kind: DatasetKind, id: Uuid) -> Result<Dataset, ApiError>
where
    S: CatalogStore + ?Sized,
{
    store
        .get_dataset(kind, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} dataset {} not found", kind.as_str(), id)))
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ClusterResponse {
    id: Uuid,
    name: String,
}

impl From<Cluster> for ClusterResponse {
    fn from(cluster: Cluster) -> Self {
        Self { id: cluster.id, name: cluster.name }
    }
}

/// Item fields with its metadata merged in. Metadata keys win on collision.
fn tabular_json(item: TabularItem) -> Value {
    let mut object = serde_json::Map::new();
    object.insert("id".into(), json!(item.id));
    object.insert("attribute".into(), json!(item.attribute));
    object.insert("date".into(), json!(item.date));
    object.insert("value".into(), json!(item.value));
    object.insert("province".into(), json!(item.province.map(|p| p.name)));
    object.insert("area_council".into(), json!(item.area_council.map(|a| a.name)));
    for (key, value) in item.metadata {
        object.insert(key, value);
    }
    Value::Object(object)
}

fn feature(id: Uuid, geometry: geojson::Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: Some(Id::String(id.to_string())),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn vector_feature(item: VectorItem) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("name".into(), json!(item.name));
    properties.insert("ref".into(), json!(item.reference));
    properties.insert("attribute".into(), json!(item.attribute));
    properties.insert("province".into(), json!(item.province.map(|p| p.name)));
    properties.insert("area_council".into(), json!(item.area_council.map(|a| a.name)));
    properties.insert("metadata".into(), Value::Object(item.metadata));
    feature(item.id, item.geometry, properties)
}

fn region_feature(shape: RegionShape) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("name".into(), json!(shape.name));
    if let Some(province) = shape.province {
        properties.insert("province".into(), json!(province));
    }
    feature(shape.id, shape.geometry, properties)
}

fn feature_collection(features: Vec<Feature>, count: u64) -> Result<Value, ApiError> {
    let mut members = JsonObject::new();
    members.insert("count".into(), json!(count));
    Ok(serde_json::to_value(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    })?)
}

// ============================================================================
// Cache
// ============================================================================

/// Serve `uri` from the cache, or run `load` and remember its result.
async fn cached<F>(cache: &ResponseCache, uri: &Uri, load: F) -> Result<Json<Value>, ApiError>
where
    F: Future<Output = Result<Value, ApiError>>,
{
    let key = uri.to_string();
    if let Some(hit) = cache.get(&key) {
        return Ok(Json(hit));
    }
    let value = load.await?;
    cache.put(&key, value.clone());
    Ok(Json(value))
}

async fn clear_cache_handler<S>(State(state): SharedState<S>) -> Json<Value>
where
    S: CatalogStore + 'static,
{
    let cleared = state.cache.len();
    state.cache.clear();
    info!(cleared, "response cache cleared");
    Json(json!({ "cleared": cleared }))
}

// ============================================================================
// Handlers: health, clusters, regions
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn clusters_handler<S>(
    State(state): SharedState<S>,
    uri: Uri,
    Query(params): Query<PageQuery>,
) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    cached(&state.cache, &uri, async {
        let page = PageRequest::new(CLUSTER_PAGES, params.page, params.page_size);
        let clusters = state.store.list_clusters(page).await?;
        Ok::<_, ApiError>(serde_json::to_value(clusters.map(ClusterResponse::from))?)
    })
    .await
}

async fn create_cluster_handler<S>(
    State(state): SharedState<S>,
    Json(body): Json<NewClusterRequest>,
) -> Result<(StatusCode, Json<ClusterResponse>), ApiError>
where
    S: CatalogStore + 'static,
{
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("cluster name is required".to_string()));
    }
    let cluster = state.store.create_cluster(name, body.order).await?;
    info!(cluster = %cluster.name, "cluster created");
    Ok((StatusCode::CREATED, Json(cluster.into())))
}

async fn delete_cluster_handler<S>(State(state): SharedState<S>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError>
where
    S: CatalogStore + 'static,
{
    state.store.delete_cluster(id).await?;
    info!(%id, "cluster deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn cluster_datasets_handler<S>(
    State(state): SharedState<S>,
    uri: Uri,
    Query(params): Query<ClusterDatasetsQuery>,
) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    let cluster = non_blank(&params.cluster)
        .ok_or_else(|| ApiError::BadRequest("Missing required 'cluster' query parameter".to_string()))?
        .to_string();

    cached(&state.cache, &uri, async {
        let filter = DatasetFilter {
            cluster: Some(cluster),
            ..Default::default()
        };
        let mut body = serde_json::Map::new();
        for kind in DatasetKind::ALL {
            let datasets = state.store.list_datasets(kind, &filter, None).await?;
            body.insert(kind.as_str().to_string(), serde_json::to_value(datasets.results)?);
        }
        Ok::<_, ApiError>(Value::Object(body))
    })
    .await
}

async fn provinces_handler<S>(State(state): SharedState<S>, uri: Uri) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    cached(&state.cache, &uri, async {
        let shapes = state.store.province_shapes().await?;
        let count = shapes.len() as u64;
        feature_collection(shapes.into_iter().map(region_feature).collect(), count)
    })
    .await
}

async fn area_councils_handler<S>(
    State(state): SharedState<S>,
    uri: Uri,
    Path(province): Path<String>,
) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    cached(&state.cache, &uri, async {
        let shapes = state.store.area_council_shapes(&province).await?;
        let count = shapes.len() as u64;
        feature_collection(shapes.into_iter().map(region_feature).collect(), count)
    })
    .await
}

// ============================================================================
// Handlers: datasets
// ============================================================================

async fn dataset_list_handler<S>(
    kind: DatasetKind,
    State(state): SharedState<S>,
    uri: Uri,
    Query(params): Query<DatasetListQuery>,
) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    cached(&state.cache, &uri, async {
        let filter = dataset_filter(state.store.as_ref(), &params).await?;
        let page = PageRequest::new(DATASET_PAGES, params.page, params.page_size);
        let datasets = state.store.list_datasets(kind, &filter, Some(page)).await?;
        Ok::<_, ApiError>(serde_json::to_value(datasets)?)
    })
    .await
}

async fn dataset_detail_handler<S>(
    kind: DatasetKind,
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
) -> Result<Json<Dataset>, ApiError>
where
    S: CatalogStore + 'static,
{
    Ok(Json(require_dataset(state.store.as_ref(), kind, id).await?))
}

fn list_route<S>(kind: DatasetKind) -> MethodRouter<Arc<AppState<S>>>
where
    S: CatalogStore + 'static,
{
    get(move |state: SharedState<S>, uri: Uri, query: Query<DatasetListQuery>| {
        dataset_list_handler(kind, state, uri, query)
    })
}

fn detail_route<S>(kind: DatasetKind) -> MethodRouter<Arc<AppState<S>>>
where
    S: CatalogStore + 'static,
{
    get(move |state: SharedState<S>, id: Path<Uuid>| dataset_detail_handler(kind, state, id))
}

// ============================================================================
// Handlers: items
// ============================================================================

async fn tabular_data_handler<S>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Query(params): Query<ItemQuery>,
) -> Result<Json<Page<Value>>, ApiError>
where
    S: CatalogStore + 'static,
{
    let store = state.store.as_ref();
    require_dataset(store, DatasetKind::Tabular, id).await?;
    let filter = item_filter(store, &params).await?;
    let page = PageRequest::new(ITEM_PAGES, params.page, params.page_size);
    let items = store.tabular_items(id, &filter, Some(page)).await?;
    Ok(Json(items.map(tabular_json)))
}

async fn tabular_xlsx_handler<S>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Query(params): Query<ItemQuery>,
) -> Result<Response, ApiError>
where
    S: CatalogStore + 'static,
{
    let store = state.store.as_ref();
    require_dataset(store, DatasetKind::Tabular, id).await?;
    let filter = item_filter(store, &params).await?;
    let items = store.tabular_items(id, &filter, None).await?.results;
    let bytes = render_xlsx(&project(&items))?;

    let disposition = format!("attachment; filename=\"{}\"", export_filename(id));
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn vector_data_handler<S>(
    State(state): SharedState<S>,
    Path(id): Path<Uuid>,
    Query(params): Query<ItemQuery>,
) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    let store = state.store.as_ref();
    require_dataset(store, DatasetKind::Vector, id).await?;
    let filter = item_filter(store, &params).await?;
    let page = PageRequest::new(ITEM_PAGES, params.page, params.page_size);
    let items = store.vector_items(id, &filter, Some(page)).await?;
    let count = items.count;
    Ok(Json(feature_collection(
        items.results.into_iter().map(vector_feature).collect(),
        count,
    )?))
}

// ============================================================================
// Handlers: imports
// ============================================================================

/// Multipart fields of an import request. `dataset` and `file` fields pair up
/// by position.
#[derive(Debug, Default)]
struct ImportForm {
    datasets: Vec<Option<Uuid>>,
    files: Vec<(String, Vec<u8>)>,
    format_style: Option<String>,
    year: Option<String>,
}

impl ImportForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = ImportForm::default();
        while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "dataset" => {
                    let text = field.text().await.map_err(bad_request)?;
                    let text = text.trim();
                    let id = if text.is_empty() {
                        None
                    } else {
                        Some(
                            text.parse::<Uuid>()
                                .map_err(|_| ApiError::BadRequest(format!("invalid dataset id '{}'", text)))?,
                        )
                    };
                    form.datasets.push(id);
                }
                "file" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(bad_request)?;
                    form.files.push((file_name, bytes.to_vec()));
                }
                "format_style" => form.format_style = Some(field.text().await.map_err(bad_request)?),
                "year" => form.year = Some(field.text().await.map_err(bad_request)?),
                _ => {}
            }
        }
        Ok(form)
    }

    /// Complete (file, dataset) pairs; half-filled pairs are dropped.
    fn uploads(self) -> Vec<Upload> {
        self.files
            .into_iter()
            .zip(self.datasets)
            .filter_map(|((file_name, bytes), dataset)| {
                let dataset_id = dataset?;
                if file_name.is_empty() && bytes.is_empty() {
                    return None;
                }
                Some(Upload { file_name, dataset_id, bytes })
            })
            .collect()
    }

    fn tabular_format(&self) -> Result<ImportFormat, ApiError> {
        let format = match non_blank(&self.format_style) {
            Some(raw) => raw.parse::<ImportFormat>()?,
            None => ImportFormat::Long,
        };
        match format {
            ImportFormat::GeoJson => Err(ApiError::BadRequest(
                "format_style must be 'long' or 'wide'".to_string(),
            )),
            tabular => Ok(tabular),
        }
    }

    fn year(&self) -> Result<i32, ApiError> {
        match non_blank(&self.year) {
            Some(raw) => raw
                .parse::<i32>()
                .map_err(|_| ApiError::BadRequest(format!("invalid year '{}'", raw))),
            None => Ok(DEFAULT_YEAR),
        }
    }
}

async fn tabular_import_handler<S>(
    State(state): SharedState<S>,
    multipart: Multipart,
) -> Result<Json<BatchReport>, ApiError>
where
    S: CatalogStore + 'static,
{
    let form = ImportForm::read(multipart).await?;
    let format = form.tabular_format()?;
    let year = form.year()?;
    let uploads = form.uploads();
    info!(files = uploads.len(), ?format, year, "tabular import requested");

    let report = import_batch(state.store.as_ref(), uploads, format, year).await?;
    Ok(Json(report))
}

async fn vector_import_handler<S>(
    State(state): SharedState<S>,
    multipart: Multipart,
) -> Result<Json<BatchReport>, ApiError>
where
    S: CatalogStore + 'static,
{
    let mut uploads = ImportForm::read(multipart).await?.uploads();
    uploads.truncate(1);
    info!(files = uploads.len(), "vector import requested");

    let report = import_batch(state.store.as_ref(), uploads, ImportFormat::GeoJson, DEFAULT_YEAR).await?;
    Ok(Json(report))
}

async fn clean_handler<S>(
    State(state): SharedState<S>,
    Json(body): Json<CleanRequest>,
) -> Result<Json<Value>, ApiError>
where
    S: CatalogStore + 'static,
{
    if body.datasets.is_empty() {
        return Err(ApiError::BadRequest("Select at least one tabular dataset.".to_string()));
    }
    let message = clean_datasets(state.store.as_ref(), &body.datasets).await?;
    info!(datasets = body.datasets.len(), "redundant values cleaned");
    Ok(Json(json!({ "message": message })))
}

// ============================================================================
// Router
// ============================================================================

fn router<S>(state: Arc<AppState<S>>) -> Router
where
    S: CatalogStore + 'static,
{
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/cluster", get(clusters_handler::<S>).post(create_cluster_handler::<S>))
        .route("/cluster/:id", delete(delete_cluster_handler::<S>))
        .route("/datasets", get(cluster_datasets_handler::<S>))
        .route("/provinces", get(provinces_handler::<S>))
        .route("/provinces/:province/area-councils", get(area_councils_handler::<S>))
        .route("/raster", list_route::<S>(DatasetKind::Raster))
        .route("/raster/:id", detail_route::<S>(DatasetKind::Raster))
        .route("/pmtiles", list_route::<S>(DatasetKind::Pmtiles))
        .route("/pmtiles/:id", detail_route::<S>(DatasetKind::Pmtiles))
        .route("/vector", list_route::<S>(DatasetKind::Vector))
        .route("/vector/import", post(vector_import_handler::<S>))
        .route("/vector/:id", detail_route::<S>(DatasetKind::Vector))
        .route("/vector/:id/data", get(vector_data_handler::<S>))
        .route("/tabular", list_route::<S>(DatasetKind::Tabular))
        .route("/tabular/import", post(tabular_import_handler::<S>))
        .route("/tabular/clean", post(clean_handler::<S>))
        .route("/tabular/:id", detail_route::<S>(DatasetKind::Tabular))
        .route("/tabular/:id/data", get(tabular_data_handler::<S>))
        .route("/tabular/:id/data-xlsx", get(tabular_xlsx_handler::<S>))
        .route("/cache/clear", post(clear_cache_handler::<S>))
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("DB_URL env var missing")?;

    println!("=== Data Catalog API ===");
    println!("Connecting to database...");

    let store = PgStore::connect(&config)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let cache = Arc::new(ResponseCache::new(config.cache_ttl));
    store.register_hook(cache.clone());
    let state = Arc::new(AppState {
        store: Arc::new(store),
        cache,
    });

    let app = router(state);

    println!("API listening on http://{}", config.api_bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  GET  /cluster?page=&page_size=");
    println!("  GET  /datasets?cluster=");
    println!("  GET  /provinces");
    println!("  GET  /provinces/:province/area-councils");
    println!("  GET  /{{raster,pmtiles,vector,tabular}}?name=&source=&type=&cluster=&order_by=");
    println!("  GET  /tabular/:id/data?attribute=&province=&area_council=&date_after=&date_before=&metadata=");
    println!("  GET  /tabular/:id/data-xlsx");
    println!("  GET  /vector/:id/data?name=&ref=&in_bbox=");
    println!("  POST /tabular/import, /vector/import, /tabular/clean, /cache/clear");

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use catalog::model::NewDataset;
    use catalog::MemoryStore;
    use std::time::Duration;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        state: Arc<AppState<MemoryStore>>,
        tabular_id: Uuid,
        vector_id: Uuid,
    }

    fn square() -> geojson::Geometry {
        geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![167.0, -14.0],
            vec![168.0, -14.0],
            vec![168.0, -13.0],
            vec![167.0, -14.0],
        ]]))
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let torba = store.create_province("Torba", &square()).await.unwrap();
        store.create_province("Sanma", &square()).await.unwrap();
        store.create_area_council("East Gaua", torba.id, &square()).await.unwrap();

        let admin = store.create_cluster("Administrative", 0).await.unwrap();
        let transport = store.create_cluster("Transportation", 1).await.unwrap();
        let tabular_id = store
            .create_dataset(NewDataset {
                source: Some("Census".to_string()),
                ..NewDataset::tabular("Population", admin.id, DatasetType::Baseline)
            })
            .await
            .unwrap()
            .id;
        let vector_id = store
            .create_dataset(NewDataset::vector("Roads", transport.id, DatasetType::Baseline))
            .await
            .unwrap()
            .id;

        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        store.register_hook(cache.clone());
        let state = Arc::new(AppState {
            store: Arc::new(store),
            cache,
        });
        Fixture {
            app: router(state.clone()),
            state,
            tabular_id,
            vector_id,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Multipart body from (field, optional file name, content) parts.
    fn multipart_request(uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let boundary = "catalog-test-boundary";
        let mut body = Vec::new();
        for (name, file_name, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Request::post(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap()
    }

    async fn import_long_csv(fx: &Fixture, csv: &str) -> Value {
        let id = fx.tabular_id.to_string();
        let (status, body) = send(
            &fx.app,
            multipart_request(
                "/tabular/import",
                &[
                    ("dataset", None, id.as_bytes()),
                    ("file", Some("population.csv"), csv.as_bytes()),
                    ("format_style", None, b"long"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    // -------------------------------------------------------------------------
    // Health and clusters
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_health() {
        let fx = fixture().await;
        let (status, body) = send(&fx.app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_cluster_list_is_refreshed_after_create() {
        let fx = fixture().await;
        let (_, body) = send(&fx.app, get_request("/cluster")).await;
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["results"][0]["name"], json!("Administrative"));
        assert!(body["results"][0].get("order").is_none());
        assert_eq!(fx.state.cache.len(), 1);

        let (status, created) = send(&fx.app, json_request("POST", "/cluster", json!({"name": "Health", "order": 5}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["name"], json!("Health"));
        assert!(fx.state.cache.is_empty());

        let (_, body) = send(&fx.app, get_request("/cluster")).await;
        assert_eq!(body["count"], json!(3));
        assert_eq!(body["results"][2]["name"], json!("Health"));

        let (status, _) = send(&fx.app, json_request("POST", "/cluster", json!({"name": "Health"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cluster_pagination() {
        let fx = fixture().await;
        let (_, body) = send(&fx.app, get_request("/cluster?page=2&page_size=1")).await;
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["name"], json!("Transportation"));
    }

    #[tokio::test]
    async fn test_delete_cluster() {
        let fx = fixture().await;
        let admin = fx.state.store.find_cluster("Administrative").await.unwrap().unwrap();
        let (status, body) = send(
            &fx.app,
            Request::delete(format!("/cluster/{}", admin.id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().starts_with("constraint violation"));

        let empty = fx.state.store.create_cluster("Empty", 9).await.unwrap();
        let (status, _) = send(
            &fx.app,
            Request::delete(format!("/cluster/{}", empty.id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(
            &fx.app,
            Request::delete(format!("/cluster/{}", empty.id)).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -------------------------------------------------------------------------
    // Datasets
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cluster_datasets_requires_cluster() {
        let fx = fixture().await;
        let (status, body) = send(&fx.app, get_request("/datasets")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Missing required 'cluster' query parameter"));

        let (status, body) = send(&fx.app, get_request("/datasets?cluster=administrative")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tabular"][0]["name"], json!("Population"));
        assert_eq!(body["tabular"][0]["cluster"], json!("Administrative"));
        assert_eq!(body["vector"], json!([]));
        assert_eq!(body["raster"], json!([]));
        assert_eq!(body["pmtiles"], json!([]));
    }

    #[tokio::test]
    async fn test_dataset_list_filters() {
        let fx = fixture().await;
        let (_, body) = send(&fx.app, get_request("/tabular?name=popu&source=CENSUS&type=baseline")).await;
        assert_eq!(body["count"], json!(1));

        let (_, body) = send(&fx.app, get_request("/tabular?type=estimated_damage")).await;
        assert_eq!(body["count"], json!(0));

        let (status, _) = send(&fx.app, get_request("/tabular?cluster=Nowhere")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&fx.app, get_request("/tabular?order_by=cluster")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&fx.app, get_request("/tabular?type=made_up")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dataset_detail_by_kind() {
        let fx = fixture().await;
        let (status, body) = send(&fx.app, get_request(&format!("/tabular/{}", fx.tabular_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], json!("baseline"));

        let (status, _) = send(&fx.app, get_request(&format!("/vector/{}", fx.tabular_id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&fx.app, get_request("/raster/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -------------------------------------------------------------------------
    // Regions
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_region_feature_collections() {
        let fx = fixture().await;
        let (_, body) = send(&fx.app, get_request("/provinces")).await;
        assert_eq!(body["type"], json!("FeatureCollection"));
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["features"][0]["geometry"]["type"], json!("Polygon"));

        let (_, body) = send(&fx.app, get_request("/provinces/torba/area-councils")).await;
        assert_eq!(body["count"], json!(1));
        assert_eq!(body["features"][0]["properties"]["name"], json!("East Gaua"));
        assert_eq!(body["features"][0]["properties"]["province"], json!("Torba"));

        let (_, body) = send(&fx.app, get_request("/provinces/Sanma/area-councils")).await;
        assert_eq!(body["features"], json!([]));
    }

    // -------------------------------------------------------------------------
    // Tabular imports and data
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_tabular_import_and_data() {
        let fx = fixture().await;
        let report = import_long_csv(
            &fx,
            "Province,Area Council,Indicator,Value,Year,Sex\nTorba,East Gaua,Population,\"1,154\",2024,F\nSanma,,Population,20,2022,M\n,,Population,n/a,2022,M\n",
        )
        .await;
        assert_eq!(report["created"], json!(2));
        assert_eq!(report["errors"], json!(1));
        assert_eq!(report["messages"][0]["level"], json!("success"));
        assert_eq!(
            report["messages"][1]["text"],
            json!("Failed to create 1 items. First error: Cannot parse value: 'n/a'")
        );

        let (_, body) = send(&fx.app, get_request(&format!("/tabular/{}/data", fx.tabular_id))).await;
        assert_eq!(body["count"], json!(2));
        let first = &body["results"][0];
        assert_eq!(first["value"], json!(1154.0));
        assert_eq!(first["date"], json!("2024-01-01"));
        assert_eq!(first["province"], json!("Torba"));
        assert_eq!(first["area_council"], json!("East Gaua"));
        assert_eq!(first["Sex"], json!("F"));

        let (_, body) = send(
            &fx.app,
            get_request(&format!("/tabular/{}/data?metadata=Sex=M", fx.tabular_id)),
        )
        .await;
        assert_eq!(body["count"], json!(1));
        assert_eq!(body["results"][0]["province"], json!("Sanma"));

        let (_, body) = send(
            &fx.app,
            get_request(&format!("/tabular/{}/data?date_after=2023-01-01", fx.tabular_id)),
        )
        .await;
        assert_eq!(body["count"], json!(1));

        let (status, body) = send(
            &fx.app,
            get_request(&format!("/tabular/{}/data?province=Atlantis", fx.tabular_id)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("unknown province 'Atlantis'"));
    }

    #[tokio::test]
    async fn test_wide_import_rejects_year_out_of_range() {
        let fx = fixture().await;
        let id = fx.tabular_id.to_string();
        let (status, body) = send(
            &fx.app,
            multipart_request(
                "/tabular/import",
                &[
                    ("dataset", None, id.as_bytes()),
                    ("file", Some("wide.csv"), b"Region,A\nTorba,1\n"),
                    ("format_style", None, b"wide"),
                    ("year", None, b"1800"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("year 1800 is outside 1900-2100"));
        assert_eq!(fx.state.store.tabular_count(), 0);

        let (status, body) = send(
            &fx.app,
            multipart_request(
                "/tabular/import",
                &[
                    ("dataset", None, id.as_bytes()),
                    ("file", Some("wide.csv"), b"Region,A,B\nTORBA,10,  \n"),
                    ("format_style", None, b"wide"),
                    ("year", None, b"2020"),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], json!(1));
    }

    #[tokio::test]
    async fn test_import_without_pairs_reports_message() {
        let fx = fixture().await;
        let (status, body) = send(
            &fx.app,
            multipart_request("/tabular/import", &[("file", Some("a.csv"), b"Value\n1\n")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"][0]["level"], json!("error"));
        assert_eq!(
            body["messages"][0]["text"],
            json!("Please add at least one file and select a dataset for it.")
        );
    }

    #[tokio::test]
    async fn test_xlsx_export() {
        let fx = fixture().await;
        import_long_csv(&fx, "Province,Value,Sex\nTorba,5,F\n").await;

        let response = fx
            .app
            .clone()
            .oneshot(get_request(&format!("/tabular/{}/data-xlsx", fx.tabular_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], XLSX_MIME);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap(),
            format!("attachment; filename=\"catalog-tabular-{}.xlsx\"", fx.tabular_id)
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let table = catalog::upload::read_workbook(&bytes).unwrap();
        assert_eq!(table.headers.last().map(String::as_str), Some("Sex"));
        assert_eq!(table.rows[0][4], "Torba");
    }

    #[tokio::test]
    async fn test_clean_endpoint() {
        let fx = fixture().await;
        import_long_csv(&fx, "Province,Value\n,1\nTorba,2\n").await;

        let (status, body) = send(
            &fx.app,
            json_request("POST", "/tabular/clean", json!({"datasets": [fx.tabular_id]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], json!("Cleaned redundant values for: Population."));
        assert_eq!(fx.state.store.tabular_count(), 1);

        let (status, _) = send(
            &fx.app,
            json_request("POST", "/tabular/clean", json!({"datasets": [Uuid::new_v4()]})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&fx.app, json_request("POST", "/tabular/clean", json!({"datasets": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -------------------------------------------------------------------------
    // Vector imports and data
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_vector_import_and_bbox_filter() {
        let fx = fixture().await;
        let collection = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"Name": "Port", "Pname": "Torba", "depth": 12},
                 "geometry": {"type": "Point", "coordinates": [167.5, -13.5]}},
                {"type": "Feature", "properties": {"Name": "Far away"},
                 "geometry": {"type": "Point", "coordinates": [10.0, 10.0]}}
            ]
        })
        .to_string();
        let id = fx.vector_id.to_string();
        let (status, report) = send(
            &fx.app,
            multipart_request(
                "/vector/import",
                &[("dataset", None, id.as_bytes()), ("file", Some("ports.geojson"), collection.as_bytes())],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["created"], json!(2));

        let (_, body) = send(&fx.app, get_request(&format!("/vector/{}/data", fx.vector_id))).await;
        assert_eq!(body["type"], json!("FeatureCollection"));
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["features"][0]["properties"]["province"], json!("Torba"));
        assert_eq!(body["features"][0]["properties"]["metadata"], json!({"depth": 12}));

        let (_, body) = send(
            &fx.app,
            get_request(&format!("/vector/{}/data?in_bbox=167,-14,168,-13", fx.vector_id)),
        )
        .await;
        assert_eq!(body["count"], json!(1));
        assert_eq!(body["features"][0]["properties"]["name"], json!("Port"));

        let (status, _) = send(
            &fx.app,
            get_request(&format!("/vector/{}/data?in_bbox=1,2", fx.vector_id)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_vector_import_rejects_other_extensions() {
        let fx = fixture().await;
        let id = fx.vector_id.to_string();
        let (_, report) = send(
            &fx.app,
            multipart_request(
                "/vector/import",
                &[("dataset", None, id.as_bytes()), ("file", Some("ports.csv"), b"a,b\n")],
            ),
        )
        .await;
        assert_eq!(report["messages"][0]["text"], json!("Please upload a GeoJSON file"));
    }

    // -------------------------------------------------------------------------
    // Cache
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cache_clear_endpoint() {
        let fx = fixture().await;
        send(&fx.app, get_request("/provinces")).await;
        send(&fx.app, get_request("/tabular")).await;
        assert_eq!(fx.state.cache.len(), 2);

        let (status, body) = send(&fx.app, Request::post("/cache/clear").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], json!(2));
        assert!(fx.state.cache.is_empty());
    }
}
