//! Shared catalog repository tests
//!
//! The same test functions run against both backends:
//!
//! - **SQLite**: in-memory, run with every `cargo test`
//! - **PostgreSQL**: testcontainers, run with `cargo test -- --ignored`
//!
//! ```bash
//! cargo test                       # SQLite only
//! cargo test -- --ignored          # PostgreSQL (requires Docker)
//! cargo test -- --include-ignored  # Both
//! ```

mod catalog;
pub mod harness;
