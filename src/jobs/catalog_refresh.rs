//! Catalog refresh worker.
//!
//! One long-lived loop per catalog kind. Every `check_interval_secs` the loop
//! runs a refresh cycle, which skips itself when the published catalog is
//! still fresh. Each cycle runs in its own task so that a panic is contained:
//! the loop logs it, waits `restart_cooldown_secs` and carries on.
//!
//! Cycles for one kind never overlap because the loop awaits each one before
//! sleeping. Loops for different kinds are independent.

use std::{sync::Arc, time::Duration};

use crate::{
    catalog::{CatalogRefreshPipeline, RefreshError, RefreshOutcome},
    observability::metrics,
};

/// How a single isolated cycle ended.
#[derive(Debug)]
pub enum CycleResult {
    Completed(RefreshOutcome),
    Failed(RefreshError),
    Panicked,
    /// The cycle task was cancelled by runtime shutdown.
    Cancelled,
}

/// Starts the refresh loop for one catalog. Never returns.
pub async fn start_catalog_refresh_worker(
    pipeline: Arc<CatalogRefreshPipeline>,
    interval: Duration,
    restart_cooldown: Duration,
) {
    let kind = pipeline.kind();
    tracing::info!(
        kind = %kind,
        interval_secs = interval.as_secs(),
        "Starting catalog refresh worker"
    );

    loop {
        match run_catalog_refresh(&pipeline, false).await {
            CycleResult::Completed(_) => {}
            CycleResult::Failed(e @ RefreshError::Swap { .. }) => {
                // Already logged at error level by the pipeline.
                tracing::debug!(kind = %kind, error = %e, "Refresh cycle aborted at swap");
            }
            CycleResult::Failed(e) => {
                tracing::warn!(
                    kind = %kind,
                    phase = e.phase(),
                    error = %e,
                    "Catalog refresh failed, retrying next interval"
                );
            }
            CycleResult::Panicked => {
                tracing::error!(
                    kind = %kind,
                    cooldown_secs = restart_cooldown.as_secs(),
                    "Catalog refresh panicked, restarting after cooldown"
                );
                metrics::record_refresh_panic(kind.as_str());
                tokio::time::sleep(restart_cooldown).await;
                continue;
            }
            CycleResult::Cancelled => {
                tracing::info!(kind = %kind, "Catalog refresh cancelled, stopping worker");
                return;
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Run one refresh cycle in its own task and report how it ended.
pub async fn run_catalog_refresh(pipeline: &Arc<CatalogRefreshPipeline>, force: bool) -> CycleResult {
    let pipeline = Arc::clone(pipeline);
    let handle = tokio::spawn(async move { pipeline.run(force).await });

    match handle.await {
        Ok(Ok(outcome)) => CycleResult::Completed(outcome),
        Ok(Err(e)) => CycleResult::Failed(e),
        Err(e) if e.is_panic() => CycleResult::Panicked,
        Err(_) => CycleResult::Cancelled,
    }
}

/// Spawn a refresh loop for every enabled CSV source in the configuration.
#[cfg(feature = "cli")]
pub fn spawn_catalog_refresh_workers(
    store: Arc<dyn crate::db::CatalogStore>,
    config: &crate::config::CatalogConfig,
) -> Vec<tokio::task::JoinHandle<()>> {
    use crate::catalog::CsvCatalogSource;

    config
        .enabled_sources()
        .map(|(kind, source)| {
            let csv = CsvCatalogSource::new(&source.path).with_skip_lines(source.skip_lines);
            let pipeline = CatalogRefreshPipeline::new(kind, Arc::clone(&store), Arc::new(csv))
                .with_batch_size(config.batch_size)
                .with_freshness_days(source.freshness_days);
            tokio::spawn(start_catalog_refresh_worker(
                Arc::new(pipeline),
                config.check_interval(),
                config.restart_cooldown(),
            ))
        })
        .collect()
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        catalog::{CatalogSource, RawRowStream, SourceError, StaticCatalogSource},
        db::tests::harness::create_sqlite_db,
        models::CatalogKind,
    };

    struct PanickingSource;

    #[async_trait]
    impl CatalogSource for PanickingSource {
        async fn rows(&self) -> Result<RawRowStream, SourceError> {
            panic!("upstream client bug");
        }

        fn describe(&self) -> String {
            "panicking".to_string()
        }
    }

    #[tokio::test]
    async fn test_panicking_cycle_is_contained() {
        let db = create_sqlite_db().await;
        let pipeline = Arc::new(CatalogRefreshPipeline::new(
            CatalogKind::Instances,
            db.catalog_store(),
            Arc::new(PanickingSource),
        ));

        assert!(matches!(
            run_catalog_refresh(&pipeline, false).await,
            CycleResult::Panicked
        ));
        // The catalog is untouched and still readable.
        assert_eq!(db.catalog().count(CatalogKind::Instances).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cycle_completes() {
        let db = create_sqlite_db().await;
        let source = StaticCatalogSource::from_records(
            &["Instance Type", "Region Code", "vCPU", "Memory", "Unit", "PricePerUnit"],
            &[&["m5.large", "us-east-1", "2", "8 GiB", "Hrs", "0.096"]],
        );
        let pipeline = Arc::new(CatalogRefreshPipeline::new(
            CatalogKind::Instances,
            db.catalog_store(),
            Arc::new(source),
        ));

        let result = run_catalog_refresh(&pipeline, false).await;
        assert!(
            matches!(result, CycleResult::Completed(RefreshOutcome::Refreshed { rows: 1, .. })),
            "{result:?}"
        );
        assert!(matches!(
            run_catalog_refresh(&pipeline, false).await,
            CycleResult::Completed(RefreshOutcome::Skipped(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_cycle_reports_error() {
        let db = create_sqlite_db().await;
        let pipeline = Arc::new(CatalogRefreshPipeline::new(
            CatalogKind::Volumes,
            db.catalog_store(),
            Arc::new(StaticCatalogSource::default()),
        ));

        assert!(matches!(
            run_catalog_refresh(&pipeline, true).await,
            CycleResult::Failed(RefreshError::EmptyCatalog { skipped: 0 })
        ));
    }

    #[tokio::test]
    async fn test_worker_survives_panics() {
        let db = create_sqlite_db().await;
        let pipeline = Arc::new(CatalogRefreshPipeline::new(
            CatalogKind::Instances,
            db.catalog_store(),
            Arc::new(PanickingSource),
        ));

        let worker = tokio::spawn(start_catalog_refresh_worker(
            pipeline,
            Duration::from_millis(5),
            Duration::from_millis(5),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!worker.is_finished(), "worker must keep running after a panic");
        worker.abort();
    }
}
