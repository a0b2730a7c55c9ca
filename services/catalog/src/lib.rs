//! Catalog - Shared domain and import pipeline for the data catalog services
//!
//! Responsibilities:
//! - Domain model for clusters, datasets, regions and items
//! - Normalize flexible-schema CSV rows and GeoJSON features
//! - Import long/wide tabular files and GeoJSON collections
//! - Clean redundant tabular items after import
//! - Seed datasets and region boundaries, export tabular items to XLSX
//! - Storage capabilities (PostgreSQL/PostGIS and in-memory)
//!
//! Row-level failures never abort an import: they are tallied and the first
//! message is kept for the caller.

pub mod cache;
pub mod clean;
pub mod config;
pub mod error;
pub mod export;
pub mod fields;
pub mod import;
pub mod model;
pub mod normalize;
pub mod query;
pub mod regions;
pub mod seed;
pub mod store;
pub mod upload;
pub mod values;

pub use config::Config;
pub use error::{ImportError, ParseError, RowError, StoreError};
pub use import::{ImportFormat, ImportSummary};
pub use store::{CatalogStore, MemoryStore, PgStore};
