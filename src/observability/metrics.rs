//! Prometheus metrics.
//!
//! Provides metrics for:
//! - Catalog refresh cycles, loaded and skipped rows, swap faults
//! - Candidate pricing during selection
//! - Recommendation outcomes
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle, set once the recorder is installed.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime; the exporter serves scrapes on
/// `config.listen`.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let listen: std::net::SocketAddr = config
        .listen
        .parse()
        .map_err(|e| MetricsError::Setup(format!("Invalid listen address: {e}")))?;

    let builder = PrometheusBuilder::new()
        .with_http_listener(listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.duration_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let (recorder, exporter) = builder.build().map_err(MetricsError::Install)?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;
    tokio::spawn(async move {
        if exporter.await.is_err() {
            tracing::error!("Prometheus exporter stopped");
        }
    });

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    tracing::info!(%listen, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Refresh Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Record the end of a refresh cycle.
///
/// # Arguments
/// * `kind` - Catalog kind (e.g., "volumes")
/// * `result` - "refreshed", "skipped" or the failing phase ("build", "populate", ...)
/// * `duration_secs` - Wall time of the cycle
pub fn record_refresh_cycle(kind: &str, result: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "catalog_refresh_cycles_total",
            "kind" => kind.to_string(),
            "result" => result.to_string()
        )
        .increment(1);

        histogram!("catalog_refresh_duration_seconds", "kind" => kind.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, result, duration_secs);
    }
}

/// Record rows written to a new catalog table and upstream rows rejected.
pub fn record_refresh_rows(kind: &str, loaded: u64, skipped: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("catalog_rows_loaded_total", "kind" => kind.to_string()).increment(loaded);
        counter!("catalog_rows_skipped_total", "kind" => kind.to_string()).increment(skipped);
        gauge!("catalog_rows", "kind" => kind.to_string()).set(loaded as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, loaded, skipped);
    }
}

/// Record a failed view swap. Production deployments alert on this.
pub fn record_swap_fault(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("catalog_swap_faults_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record superseded catalog tables dropped by pruning.
pub fn record_tables_pruned(kind: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("catalog_tables_pruned_total", "kind" => kind.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, count);
    }
}

/// Record a refresh loop restart after a panicked cycle.
pub fn record_refresh_panic(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("catalog_refresh_panics_total", "kind" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recommendation Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Record one selection pass.
///
/// # Arguments
/// * `kind` - Catalog kind searched
/// * `found` - Whether any candidate could be priced
/// * `skipped` - Candidates dropped because a price component was missing
pub fn record_candidates(kind: &str, found: bool, skipped: usize) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "selector_runs_total",
            "kind" => kind.to_string(),
            "found" => found.to_string()
        )
        .increment(1);
        counter!("selector_candidates_skipped_total", "kind" => kind.to_string())
            .increment(skipped as u64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, found, skipped);
    }
}

/// Record a finished recommendation request.
///
/// # Arguments
/// * `kind` - Catalog kind of the resource
/// * `outcome` - "rightsized", "no_feasible_configuration", "upsizing_excluded",
///   or an error class ("invalid_input", "not_found", "upstream_unavailable")
/// * `duration_secs` - Wall time of the request
pub fn record_recommendation(kind: &str, outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "recommendations_total",
            "kind" => kind.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!("recommendation_duration_seconds", "kind" => kind.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (kind, outcome, duration_secs);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_refresh_cycle("volumes", "refreshed", 1.5);
        record_refresh_rows("volumes", 10, 2);
        record_swap_fault("volumes");
        record_candidates("instances", true, 0);
        record_recommendation("instances", "rightsized", 0.01);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_seconds_from_ms() {
        assert_eq!(seconds_from_ms(&[5.0, 250.0]), vec![0.005, 0.25]);
    }

    #[cfg(feature = "prometheus")]
    #[test]
    fn test_disabled_metrics_skip_install() {
        let config = MetricsConfig {
            enabled: false,
            listen: "not an address".to_string(),
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }
}
