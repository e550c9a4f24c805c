//! Append-then-swap catalog refresh.
//!
//! One cycle walks `Idle → Building → Populating → Swapping → Pruning → Idle`:
//!
//! - **Building**: create a fresh versioned table (`<view>_v_<uuid v7>`).
//! - **Populating**: stream upstream rows through the [`CatalogSchema`] into
//!   the new table in batches. Bad rows are logged, counted and skipped.
//! - **Swapping**: repoint the canonical view and the `catalog_versions`
//!   pointer in one transaction. Readers see the old rows or the new rows,
//!   never a mix.
//! - **Pruning**: drop every versioned table except the one the pointer names.
//!
//! A failure before the swap leaves the view untouched; the abandoned table is
//! removed by the prune that opens the next cycle.

use std::{sync::Arc, time::Instant};

use chrono::{Duration, Utc};
use futures::StreamExt;
use thiserror::Error;

use super::{
    schema::CatalogSchema,
    source::{CatalogSource, SourceError},
};
use crate::{
    db::{CatalogStore, DbError, VersionedTableName},
    models::{CatalogKind, CatalogRow, CatalogVersion},
    observability::metrics,
};

/// Rows written per insert call.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Catalog prices change rarely; refresh yearly unless configured otherwise.
pub const DEFAULT_FRESHNESS_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Building,
    Populating,
    Swapping,
    Pruning,
}

impl RefreshState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Populating => "populating",
            Self::Swapping => "swapping",
            Self::Pruning => "pruning",
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Failed to read catalog version: {0}")]
    Version(#[source] DbError),

    #[error("Failed to create catalog table: {0}")]
    Build(#[source] DbError),

    #[error("Failed to populate {table}: {source}")]
    Populate {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to swap catalog view to {table}: {source}")]
    Swap {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("Failed to prune catalog tables: {0}")]
    Prune(#[source] DbError),

    #[error("Upstream source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Upstream produced no valid rows ({skipped} skipped); keeping current catalog")]
    EmptyCatalog { skipped: u64 },
}

impl RefreshError {
    /// Phase label for logs and metrics.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Build(_) => "build",
            Self::Populate { .. } => "populate",
            Self::Swap { .. } => "swap",
            Self::Prune(_) => "prune",
            Self::Source(_) => "source",
            Self::EmptyCatalog { .. } => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// The published catalog is younger than the freshness threshold.
    Skipped(CatalogVersion),
    Refreshed {
        table: VersionedTableName,
        rows: u64,
        skipped: u64,
        pruned: u64,
    },
}

/// Refreshes one catalog kind from one upstream source.
///
/// Only one cycle per kind may run at a time; the refresh worker guarantees
/// this by awaiting each cycle before scheduling the next.
pub struct CatalogRefreshPipeline {
    kind: CatalogKind,
    schema: CatalogSchema,
    store: Arc<dyn CatalogStore>,
    source: Arc<dyn CatalogSource>,
    batch_size: usize,
    freshness: Duration,
}

impl CatalogRefreshPipeline {
    pub fn new(
        kind: CatalogKind,
        store: Arc<dyn CatalogStore>,
        source: Arc<dyn CatalogSource>,
    ) -> Self {
        Self {
            kind,
            schema: CatalogSchema::for_kind(kind),
            store,
            source,
            batch_size: DEFAULT_BATCH_SIZE,
            freshness: Duration::days(DEFAULT_FRESHNESS_DAYS),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_freshness_days(mut self, days: i64) -> Self {
        self.freshness = Duration::days(days);
        self
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    fn enter(&self, state: RefreshState) {
        tracing::debug!(kind = %self.kind, state = state.as_str(), "Catalog refresh state");
    }

    /// Run one refresh cycle. Without `force`, a catalog refreshed within the
    /// freshness window is left alone.
    #[tracing::instrument(skip(self), fields(kind = %self.kind))]
    pub async fn run(&self, force: bool) -> Result<RefreshOutcome, RefreshError> {
        let start = Instant::now();
        let result = self.run_cycle(force).await;
        let duration = start.elapsed().as_secs_f64();

        match &result {
            Ok(RefreshOutcome::Skipped(version)) => {
                tracing::debug!(
                    refreshed_at = %version.refreshed_at,
                    "Catalog is fresh, skipping refresh"
                );
                metrics::record_refresh_cycle(self.kind.as_str(), "skipped", duration);
            }
            Ok(RefreshOutcome::Refreshed {
                table,
                rows,
                skipped,
                pruned,
            }) => {
                tracing::info!(
                    table = %table,
                    rows,
                    skipped,
                    pruned,
                    duration_secs = duration,
                    "Catalog refreshed"
                );
                metrics::record_refresh_cycle(self.kind.as_str(), "refreshed", duration);
            }
            Err(e) => {
                metrics::record_refresh_cycle(self.kind.as_str(), e.phase(), duration);
            }
        }
        self.enter(RefreshState::Idle);
        result
    }

    async fn run_cycle(&self, force: bool) -> Result<RefreshOutcome, RefreshError> {
        let current = self
            .store
            .current_version(self.kind)
            .await
            .map_err(RefreshError::Version)?;

        if !force
            && let Some(version) = current.as_ref()
            && Utc::now() - version.refreshed_at < self.freshness
        {
            return Ok(RefreshOutcome::Skipped(version.clone()));
        }

        // Clear tables abandoned by failed cycles. Until the first swap there is
        // no pointer and the view still reads the migration's initial table.
        // `prune` reads the pointer again, another refresh may have swapped since.
        if current.is_some()
            && let Err(e) = self.prune().await
        {
            tracing::warn!(error = %e, "Pre-refresh prune failed, continuing");
        }

        self.enter(RefreshState::Building);
        let table = VersionedTableName::generate(self.kind);
        self.store
            .create_table(&table)
            .await
            .map_err(RefreshError::Build)?;

        self.enter(RefreshState::Populating);
        let (rows, skipped) = self.populate(&table).await?;
        metrics::record_refresh_rows(self.kind.as_str(), rows, skipped);
        if rows == 0 {
            return Err(RefreshError::EmptyCatalog { skipped });
        }

        self.enter(RefreshState::Swapping);
        if let Err(source) = self
            .store
            .swap_view(&table, rows as i64, skipped as i64)
            .await
        {
            tracing::error!(
                kind = %self.kind,
                table = %table,
                error = %source,
                "Catalog swap failed, previous catalog remains authoritative"
            );
            metrics::record_swap_fault(self.kind.as_str());
            return Err(RefreshError::Swap {
                table: table.to_string(),
                source,
            });
        }

        self.enter(RefreshState::Pruning);
        let pruned = match self.prune().await {
            Ok(pruned) => pruned,
            Err(e) => {
                tracing::warn!(error = %e, "Post-swap prune failed, will retry next cycle");
                0
            }
        };

        Ok(RefreshOutcome::Refreshed {
            table,
            rows,
            skipped,
            pruned,
        })
    }

    /// Stream upstream rows into `table`. Returns `(written, skipped)`.
    async fn populate(&self, table: &VersionedTableName) -> Result<(u64, u64), RefreshError> {
        let mut stream = self.source.rows().await?;
        tracing::debug!(source = %self.source.describe(), table = %table, "Populating catalog table");

        let mut batch: Vec<CatalogRow> = Vec::with_capacity(self.batch_size);
        let mut written = 0u64;
        let mut skipped = 0u64;
        let mut position = 0i64;

        while let Some(raw) = stream.next().await {
            position += 1;
            let row = match raw {
                Ok(raw) => self.schema.load(position, &raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match row {
                Ok(row) => batch.push(row),
                Err(reason) => {
                    tracing::warn!(position, reason = %reason, "Skipping invalid upstream row");
                    skipped += 1;
                    continue;
                }
            }

            if batch.len() >= self.batch_size {
                written += self.flush(table, &mut batch).await?;
            }
        }
        written += self.flush(table, &mut batch).await?;

        Ok((written, skipped))
    }

    async fn flush(
        &self,
        table: &VersionedTableName,
        batch: &mut Vec<CatalogRow>,
    ) -> Result<u64, RefreshError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let written = self
            .store
            .insert_rows(table, batch)
            .await
            .map_err(|source| RefreshError::Populate {
                table: table.to_string(),
                source,
            })?;
        batch.clear();
        Ok(written)
    }

    /// Drop every versioned table of this kind except the one the view reads.
    ///
    /// The pointer is read at call time. Does nothing before the first
    /// successful refresh.
    pub async fn prune(&self) -> Result<u64, RefreshError> {
        let current = self
            .store
            .current_version(self.kind)
            .await
            .map_err(RefreshError::Version)?;
        match current {
            Some(version) => self.prune_except(&version.table_name).await,
            None => Ok(0),
        }
    }

    async fn prune_except(&self, keep: &str) -> Result<u64, RefreshError> {
        let tables = self
            .store
            .list_versioned_tables(self.kind)
            .await
            .map_err(RefreshError::Prune)?;

        let mut dropped = 0u64;
        for table in tables.iter().filter(|t| t.as_str() != keep) {
            self.store
                .drop_table(table)
                .await
                .map_err(RefreshError::Prune)?;
            tracing::debug!(table = %table, "Dropped superseded catalog table");
            dropped += 1;
        }
        if dropped > 0 {
            metrics::record_tables_pruned(self.kind.as_str(), dropped);
        }
        Ok(dropped)
    }
}
