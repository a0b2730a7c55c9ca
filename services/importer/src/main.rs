//! Importer - Offline loading of the data catalog
//!
//! Responsibilities:
//! - Apply database migrations
//! - Load province and area council boundaries from GeoJSON
//! - Seed tabular datasets and their items from a master sheet
//! - Import one long, wide or GeoJSON file into a dataset (optionally dry-run)
//! - Remove redundant tabular items
//!
//! Summaries go to stdout, diagnostics to the tracing subscriber.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use catalog::clean::clean_redundant_tabular_items;
use catalog::import::{import_file, ImportFormat, ImportSummary, DEFAULT_YEAR};
use catalog::model::{Dataset, DatasetKind, NewDataset, RegionLevel};
use catalog::query::DatasetFilter;
use catalog::seed::{import_datasets, import_master_items, import_regions};
use catalog::upload::{read_features, read_table};
use catalog::{CatalogStore, Config, MemoryStore, PgStore};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Loads boundaries, datasets and data files into the catalog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Load region boundaries from a GeoJSON file
    ImportRegions {
        #[arg(long, value_enum)]
        level: Level,
        file: PathBuf,
    },

    /// Create the tabular datasets listed in a master sheet
    ImportDatasets { file: PathBuf },

    /// Import master sheet rows into the datasets they name
    ImportTabular { file: PathBuf },

    /// Import one data file into an existing dataset
    ImportFile {
        /// Target dataset id (UUID)
        #[arg(long)]
        dataset: Uuid,

        #[arg(long, value_enum, default_value = "long")]
        format: Format,

        /// Date for wide-format values (January 1st of this year)
        #[arg(long, default_value_t = DEFAULT_YEAR)]
        year: i32,

        /// Dry run - import into memory and report, don't save to database
        #[arg(long, default_value = "false")]
        dry_run: bool,

        file: PathBuf,
    },

    /// Drop less specific tabular items (all tabular datasets by default)
    CleanTabular {
        #[arg(long)]
        dataset: Option<Uuid>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Province,
    AreaCouncil,
}

impl From<Level> for RegionLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Province => RegionLevel::Province,
            Level::AreaCouncil => RegionLevel::AreaCouncil,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Long,
    Wide,
    Geojson,
}

impl From<Format> for ImportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Long => ImportFormat::Long,
            Format::Wide => ImportFormat::Wide,
            Format::Geojson => ImportFormat::GeoJson,
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn read_upload(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    Ok((file_name, bytes))
}

fn print_summary(summary: &ImportSummary) {
    println!("Created: {}", summary.created);
    println!("Errors: {}", summary.errors);
    for message in summary.messages() {
        println!("  {}", message.text);
    }
}

/// A scratch store holding copies of the regions and of one dataset, so a file
/// can be imported without touching the database.
async fn dry_run_store<S>(source: &S, dataset: &Dataset) -> Result<(MemoryStore, Uuid)>
where
    S: CatalogStore + ?Sized,
{
    let scratch = MemoryStore::new();
    for province in source.province_shapes().await? {
        scratch.create_province(&province.name, &province.geometry).await?;
        for council in source.area_council_shapes(&province.name).await? {
            let parent = scratch
                .find_province(&province.name)
                .await?
                .context("province copy missing")?;
            scratch
                .create_area_council(&council.name, parent.id, &council.geometry)
                .await?;
        }
    }

    let (cluster, _) = scratch.find_or_create_cluster(&dataset.cluster).await?;
    let copy = scratch
        .create_dataset(NewDataset {
            kind: dataset.kind,
            name: dataset.name.clone(),
            description: dataset.description.clone(),
            cluster_id: cluster.id,
            dataset_type: dataset.dataset_type,
            source: dataset.source.clone(),
            unit: dataset.unit.clone(),
            ..Default::default()
        })
        .await?;
    Ok((scratch, copy.id))
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_import_file<S>(
    store: &S,
    dataset_id: Uuid,
    format: ImportFormat,
    year: i32,
    dry_run: bool,
    file: &Path,
) -> Result<ImportSummary>
where
    S: CatalogStore + ?Sized,
{
    let kind = format.dataset_kind();
    let dataset = store
        .get_dataset(kind, dataset_id)
        .await?
        .with_context(|| format!("{} dataset {} not found", kind.as_str(), dataset_id))?;
    let (file_name, bytes) = read_upload(file).await?;

    println!("Dataset: {} ({})", dataset.name, dataset.cluster);
    println!("Mode: {}", if dry_run { "dry-run" } else { "live" });

    let summary = if dry_run {
        let (scratch, copy_id) = dry_run_store(store, &dataset).await?;
        info!(dataset = %dataset.id, scratch = %copy_id, "dry run against in-memory copy");
        let summary = import_file(&scratch, copy_id, &file_name, &bytes, format, year).await?;
        println!("\nDry run - no items saved to database");
        summary
    } else {
        import_file(store, dataset.id, &file_name, &bytes, format, year).await?
    };
    Ok(summary)
}

async fn run_clean<S>(store: &S, dataset: Option<Uuid>) -> Result<Vec<String>>
where
    S: CatalogStore + ?Sized,
{
    let datasets = match dataset {
        Some(id) => vec![store
            .get_dataset(DatasetKind::Tabular, id)
            .await?
            .with_context(|| format!("tabular dataset {} not found", id))?],
        None => {
            store
                .list_datasets(DatasetKind::Tabular, &DatasetFilter::default(), None)
                .await?
                .results
        }
    };

    if datasets.is_empty() {
        warn!("no tabular datasets to clean");
    }
    let mut lines = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        clean_redundant_tabular_items(store, dataset.id).await?;
        lines.push(format!("Removed redundant {} tabular items.", dataset.name));
    }
    Ok(lines)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("DB_URL env var missing")?;

    println!("=== Data Catalog Importer ===");

    let store = PgStore::connect(&config)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Command::Migrate => {
            store.migrate().await.context("Failed to apply migrations")?;
            info!("migrations applied");
            println!("Migrations applied.");
        }
        Command::ImportRegions { level, file } => {
            let (file_name, bytes) = read_upload(&file).await?;
            let features = read_features(&bytes).with_context(|| format!("Failed to read {}", file_name))?;
            println!("Features: {}", features.len());
            let summary = import_regions(&store, level.into(), features).await;
            print_summary(&summary);
        }
        Command::ImportDatasets { file } => {
            let (file_name, bytes) = read_upload(&file).await?;
            let table = read_table(&file_name, &bytes)?;
            let created = import_datasets(&store, &table).await?;
            println!("{} datasets created from {}.", created, file_name);
        }
        Command::ImportTabular { file } => {
            let (file_name, bytes) = read_upload(&file).await?;
            let table = read_table(&file_name, &bytes)?;
            let summary = import_master_items(&store, &table).await;
            println!("{} tabular items created from {}.", summary.created, file_name);
            if summary.errors > 0 {
                print_summary(&summary);
            }
        }
        Command::ImportFile {
            dataset,
            format,
            year,
            dry_run,
            file,
        } => {
            let summary = run_import_file(&store, dataset, format.into(), year, dry_run, &file).await?;
            print_summary(&summary);
        }
        Command::CleanTabular { dataset } => {
            for line in run_clean(&store, dataset).await? {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
