//! Observability: structured logging and Prometheus metrics.
//!
//! - Logging through `tracing`, with the subscriber configured from
//!   `[observability.logging]` (pretty, compact or JSON output)
//! - Prometheus metrics for catalog refreshes, candidate pricing and
//!   recommendation outcomes, exported on their own listener

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
