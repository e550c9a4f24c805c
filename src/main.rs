use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use rightsizer::{
    catalog::{CatalogRefreshPipeline, CsvCatalogSource, RefreshOutcome},
    config::RightsizerConfig,
    db::DbPool,
    jobs::{self, CycleResult},
    models::{CatalogKind, RecommendationRequest},
    observability,
    services::RecommendationEngine,
};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "rightsizer.toml";

/// CLI arguments for the rightsizer
#[derive(Parser, Debug)]
#[command(version, about = "Rightsizing recommendations against tiered pricing catalogs", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./rightsizer.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Keep every configured catalog fresh until interrupted (default)
    Serve,
    /// Run a single refresh cycle for one catalog
    Refresh {
        /// Catalog to refresh: instances, volumes or db_storage
        kind: String,
        /// Price-list CSV (defaults to the configured source for the catalog)
        #[arg(short, long)]
        source: Option<PathBuf>,
        /// Metadata lines before the CSV header (overrides the configured value)
        #[arg(long)]
        skip_lines: Option<usize>,
        /// Refresh even if the published catalog is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Compute a recommendation for a JSON request and print it
    Recommend {
        /// Request file
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Run database migrations and exit
    ///
    /// Useful for init containers or CI/CD pipelines.
    Migrate,
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Refresh {
            kind,
            source,
            skip_lines,
            force,
        }) => {
            run_refresh(args.config.as_deref(), &kind, source, skip_lines, force).await;
        }
        Some(Command::Recommend { input }) => {
            run_recommend(args.config.as_deref(), &input).await;
        }
        Some(Command::Migrate) => {
            run_migrate(args.config.as_deref()).await;
        }
        Some(Command::Features) => {
            run_features();
        }
        Some(Command::Serve) | None => {
            run_server(args.config.as_deref()).await;
        }
    }
}

fn load_config(explicit_config_path: Option<&str>) -> RightsizerConfig {
    let path = match explicit_config_path {
        Some(path) => PathBuf::from(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => PathBuf::from(DEFAULT_CONFIG_FILE),
        None => return RightsizerConfig::default(),
    };

    match RightsizerConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &RightsizerConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Connect to the configured database, running migrations when enabled.
async fn connect_database(config: &RightsizerConfig) -> DbPool {
    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Add a [database] section to the config file.");
        std::process::exit(1);
    }

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if config.database.run_migrations()
        && let Err(e) = db.run_migrations().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }
    db
}

async fn run_server(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting rightsizer catalog refresh"
    );

    let db = connect_database(&config).await;
    let handles = jobs::spawn_catalog_refresh_workers(db.catalog_store(), &config.catalog);
    if handles.is_empty() {
        tracing::warn!("No catalog sources are enabled, nothing to refresh");
    } else {
        tracing::info!(workers = handles.len(), "Catalog refresh workers started");
    }

    shutdown_signal().await;

    for handle in handles {
        handle.abort();
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping refresh workers");
}

async fn run_refresh(
    explicit_config_path: Option<&str>,
    kind: &str,
    source: Option<PathBuf>,
    skip_lines: Option<usize>,
    force: bool,
) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);

    let Some(kind) = CatalogKind::parse(kind) else {
        eprintln!("Error: Unknown catalog '{kind}'. Expected one of: instances, volumes, db_storage");
        std::process::exit(1);
    };

    let configured = config.catalog.sources.get(&kind);
    let path = match (source, configured) {
        (Some(path), _) => path,
        (None, Some(configured)) => PathBuf::from(&configured.path),
        (None, None) => {
            eprintln!("Error: No source configured for {kind}. Pass --source <file.csv>.");
            std::process::exit(1);
        }
    };
    let skip_lines = skip_lines
        .or(configured.map(|c| c.skip_lines))
        .unwrap_or_default();

    let db = connect_database(&config).await;
    let csv = CsvCatalogSource::new(&path).with_skip_lines(skip_lines);
    let mut pipeline = CatalogRefreshPipeline::new(kind, db.catalog_store(), Arc::new(csv))
        .with_batch_size(config.catalog.batch_size);
    if let Some(configured) = configured {
        pipeline = pipeline.with_freshness_days(configured.freshness_days);
    }

    match jobs::run_catalog_refresh(&Arc::new(pipeline), force).await {
        CycleResult::Completed(RefreshOutcome::Skipped(version)) => {
            println!(
                "{kind} catalog is fresh (refreshed {}, {} rows); use --force to refresh anyway",
                version.refreshed_at.to_rfc3339(),
                version.row_count
            );
        }
        CycleResult::Completed(RefreshOutcome::Refreshed {
            table,
            rows,
            skipped,
            pruned,
        }) => {
            println!(
                "{kind} catalog published from {table}: {rows} rows, {skipped} skipped, {pruned} old tables pruned"
            );
        }
        CycleResult::Failed(e) => {
            eprintln!("Error: Refresh failed during {}: {}", e.phase(), e);
            std::process::exit(1);
        }
        CycleResult::Panicked | CycleResult::Cancelled => {
            eprintln!("Error: Refresh cycle did not complete");
            std::process::exit(1);
        }
    }
}

async fn run_recommend(explicit_config_path: Option<&str>, input: &Path) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);

    let request: RecommendationRequest = match std::fs::read_to_string(input)
        .map_err(|e| e.to_string())
        .and_then(|body| serde_json::from_str(&body).map_err(|e| e.to_string()))
    {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Error: Failed to read request from {}: {}", input.display(), e);
            std::process::exit(1);
        }
    };

    let db = connect_database(&config).await;
    let engine = RecommendationEngine::new(db.catalog(), config.recommendations.clone());

    match engine.recommend(&request).await {
        Ok(recommendation) => match serde_json::to_string_pretty(&recommendation) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error: Failed to serialize recommendation: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_migrate(explicit_config_path: Option<&str>) {
    let config = load_config(explicit_config_path);
    init_tracing(&config);

    tracing::info!("Running database migrations");

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_features() {
    let features = [
        ("database-sqlite", cfg!(feature = "database-sqlite")),
        ("database-postgres", cfg!(feature = "database-postgres")),
        ("prometheus", cfg!(feature = "prometheus")),
        ("cli", cfg!(feature = "cli")),
    ];
    for (name, enabled) in features {
        println!("{:<20} {}", name, if enabled { "enabled" } else { "disabled" });
    }
}
