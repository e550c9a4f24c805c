//! Rightsizing recommendations against a tiered pricing catalog.
//!
//! The crate turns observed usage of a compute instance, block volume or
//! managed-database storage into the cheapest catalog configuration that
//! still fits, and keeps the catalogs it prices against fresh.
//!
//! - [`usage`] summarises provider metric series
//! - [`pricing`] prices a configuration under its family's tier model
//! - [`preferences`] turns user preferences into typed catalog constraints
//! - [`selector`] finds the cheapest candidate that satisfies them
//! - [`services`] orchestrates a full recommendation request
//! - [`catalog`] and [`jobs`] rebuild and publish catalogs in the background

pub mod catalog;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod preferences;
pub mod pricing;
pub mod selector;
pub mod services;
pub mod usage;
