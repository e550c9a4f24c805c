//! Pricing catalog ingestion.
//!
//! Upstream price-list rows arrive through a [`CatalogSource`], are mapped onto
//! catalog rows by a declarative [`CatalogSchema`], and are published by the
//! [`CatalogRefreshPipeline`] into a fresh versioned table that replaces the
//! previous one behind the canonical view in a single transaction.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rightsizer::catalog::{CatalogRefreshPipeline, CsvCatalogSource};
//!
//! let source = Arc::new(CsvCatalogSource::new("prices/volumes.csv").with_skip_lines(5));
//! let pipeline = CatalogRefreshPipeline::new(CatalogKind::Volumes, db.catalog_store(), source);
//! match pipeline.run(false).await? {
//!     RefreshOutcome::Skipped(version) => println!("fresh as of {}", version.refreshed_at),
//!     RefreshOutcome::Refreshed { rows, .. } => println!("loaded {rows} rows"),
//! }
//! ```

mod pipeline;
mod schema;
mod source;

pub use pipeline::{
    CatalogRefreshPipeline, DEFAULT_BATCH_SIZE, DEFAULT_FRESHNESS_DAYS, RefreshError,
    RefreshOutcome, RefreshState,
};
pub use schema::{CatalogSchema, ColumnMapping, RowError};
#[cfg(feature = "cli")]
pub use source::CsvCatalogSource;
pub use source::{CatalogSource, RawRow, RawRowStream, SourceError, StaticCatalogSource};
