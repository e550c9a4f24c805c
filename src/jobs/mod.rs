//! Background jobs.
//!
//! - **Catalog Refresh**: one loop per configured catalog kind that rebuilds
//!   the catalog from its upstream price list when the published copy is
//!   older than the kind's freshness threshold.
//!
//! Jobs follow a consistent pattern:
//! 1. Configuration in `config/catalog.rs`
//! 2. Worker function that runs in a loop with configurable interval
//! 3. Run function that performs a single pass
//! 4. Structured result type for tracking state
//! 5. Metrics for monitoring operations
//!
//! # Example
//!
//! ```toml
//! [catalog]
//! check_interval_secs = 300
//! restart_cooldown_secs = 60
//!
//! [catalog.sources.db_storage]
//! path = "/var/lib/rightsizer/rds-storage.csv"
//! freshness_days = 7
//! ```

mod catalog_refresh;

#[cfg(feature = "cli")]
pub use catalog_refresh::spawn_catalog_refresh_workers;
pub use catalog_refresh::{CycleResult, run_catalog_refresh, start_catalog_refresh_worker};
