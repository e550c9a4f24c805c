//! Cheapest-fit selection.
//!
//! Turns observed usage into needed capacity, fetches the catalog entries
//! that satisfy it, prices every candidate and keeps the cheapest. A
//! candidate that cannot be priced is skipped; the selection only fails when
//! nothing was priceable.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    db::{CatalogFilter, CatalogRepo, DbError},
    models::{
        BreathingRoomOverrides, CatalogColumn, CatalogKind, Dimension, Family,
        PricingCatalogEntry, ResourceSpec, UsageKey, UsageSummary,
    },
    observability::metrics,
    preferences::{Constraint, ResolvedPreferences},
    pricing::{Quote, TieredPricingCalculator},
};

/// Breathing room per dimension, in percent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BreathingRoom {
    #[serde(default = "default_breathing_room")]
    pub cpu: f64,
    #[serde(default = "default_breathing_room")]
    pub memory: f64,
    #[serde(default = "default_breathing_room")]
    pub network: f64,
    #[serde(default = "default_breathing_room")]
    pub iops: f64,
    #[serde(default = "default_breathing_room")]
    pub throughput: f64,
}

fn default_breathing_room() -> f64 {
    20.0
}

impl Default for BreathingRoom {
    fn default() -> Self {
        Self {
            cpu: default_breathing_room(),
            memory: default_breathing_room(),
            network: default_breathing_room(),
            iops: default_breathing_room(),
            throughput: default_breathing_room(),
        }
    }
}

impl BreathingRoom {
    pub fn with_overrides(self, overrides: &BreathingRoomOverrides) -> Self {
        Self {
            cpu: overrides.cpu.unwrap_or(self.cpu),
            memory: overrides.memory.unwrap_or(self.memory),
            network: overrides.network.unwrap_or(self.network),
            iops: overrides.iops.unwrap_or(self.iops),
            throughput: overrides.throughput.unwrap_or(self.throughput),
        }
    }
}

/// Capacity a recommended configuration must provide. A dimension without
/// a value is unconstrained (typically because its metric was not monitored).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NeededCapacity(BTreeMap<Dimension, f64>);

impl NeededCapacity {
    pub fn with(mut self, dimension: Dimension, value: f64) -> Self {
        self.0.insert(dimension, value);
        self
    }

    pub fn get(&self, dimension: Dimension) -> Option<f64> {
        self.0.get(&dimension).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, f64)> + '_ {
        self.0.iter().map(|(d, v)| (*d, *v))
    }

    /// The configuration each candidate is priced at.
    fn requested_spec(&self, kind: CatalogKind, family: Family) -> ResourceSpec {
        let mut spec = ResourceSpec::new(kind, family);
        for (dimension, value) in self.iter() {
            spec.set(dimension, value);
        }
        spec
    }
}

/// Capacity needed for a utilisation percentage: `capacity * (util + room) / 100`.
pub fn utilization_headroom(capacity: f64, utilization_pct: f64, breathing_pct: f64) -> f64 {
    capacity * (utilization_pct + breathing_pct) / 100.0
}

/// Capacity needed for an absolute rate: `observed * (1 + room / 100)`.
pub fn rate_headroom(observed: f64, breathing_pct: f64) -> f64 {
    observed * (1.0 + breathing_pct / 100.0)
}

/// Needed capacity for `current` given its usage.
///
/// CPU, network, IOPS and throughput are sized on the average; memory is
/// sized on the maximum. Storage size is never reduced.
pub fn needed_capacity(
    current: &ResourceSpec,
    usage: &BTreeMap<UsageKey, UsageSummary>,
    room: &BreathingRoom,
) -> NeededCapacity {
    let avg = |key: UsageKey| usage.get(&key).and_then(|s| s.avg);
    let max = |key: UsageKey| usage.get(&key).and_then(|s| s.max);
    let mut needed = NeededCapacity::default();

    match current.kind {
        CatalogKind::Instances => {
            if let (Some(vcpu), Some(util)) = (current.get(Dimension::Vcpu), avg(UsageKey::Cpu)) {
                needed = needed.with(Dimension::Vcpu, utilization_headroom(vcpu, util, room.cpu));
            }
            if let (Some(memory), Some(util)) =
                (current.get(Dimension::MemoryGib), max(UsageKey::Memory))
            {
                needed = needed.with(
                    Dimension::MemoryGib,
                    utilization_headroom(memory, util, room.memory),
                );
            }
            if let Some(network) = avg(UsageKey::Network) {
                needed = needed.with(Dimension::NetworkMbps, rate_headroom(network, room.network));
            }
        }
        CatalogKind::Volumes | CatalogKind::DbStorage => {
            if let Some(size) = current.get(Dimension::SizeGib) {
                needed = needed.with(Dimension::SizeGib, size);
            }
            if let Some(iops) = avg(UsageKey::Iops) {
                needed = needed.with(Dimension::Iops, rate_headroom(iops, room.iops));
            }
            if let Some(throughput) = avg(UsageKey::Throughput) {
                needed = needed.with(
                    Dimension::ThroughputMbps,
                    rate_headroom(throughput, room.throughput),
                );
            }
        }
    }
    needed
}

/// Catalog column that bounds a dimension.
fn capacity_column(dimension: Dimension) -> Option<CatalogColumn> {
    match dimension {
        Dimension::Vcpu => Some(CatalogColumn::Vcpu),
        Dimension::MemoryGib => Some(CatalogColumn::MemoryGib),
        Dimension::NetworkMbps => Some(CatalogColumn::NetworkMbps),
        Dimension::SizeGib => Some(CatalogColumn::MaxSizeGib),
        Dimension::Iops => Some(CatalogColumn::MaxIops),
        Dimension::ThroughputMbps => Some(CatalogColumn::MaxThroughputMbps),
        Dimension::BaselineIops | Dimension::BaselineThroughputMbps => None,
    }
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no catalog configuration satisfies the needed capacity")]
    NoFeasibleConfiguration,

    #[error("none of the {skipped} matching candidates could be priced")]
    AllCandidatesUnpriced { skipped: usize },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// The cheapest candidate and its quote.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub entry: PricingCatalogEntry,
    pub quote: Quote,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    Selected(Selection),
    /// The cheapest fit costs more than the current configuration and
    /// upsizing was excluded.
    UpsizingExcluded(Selection),
}

pub struct SelectRequest<'a> {
    pub kind: CatalogKind,
    pub region: &'a str,
    pub needed: &'a NeededCapacity,
    pub preferences: &'a ResolvedPreferences,
    /// Families candidates may come from; empty means every family of `kind`.
    pub valid_families: &'a [Family],
    /// Monthly cost of the current configuration, for upsizing exclusion.
    pub current_cost: Option<f64>,
}

#[derive(Clone)]
pub struct CheapestFitSelector {
    catalog: Arc<dyn CatalogRepo>,
    pricing: Arc<TieredPricingCalculator>,
}

impl CheapestFitSelector {
    pub fn new(catalog: Arc<dyn CatalogRepo>, pricing: Arc<TieredPricingCalculator>) -> Self {
        Self { catalog, pricing }
    }

    /// Filter passed to the catalog: resolved constraints, plus a capacity
    /// bound for every needed dimension no constraint already covers.
    pub fn filter(&self, request: &SelectRequest<'_>) -> CatalogFilter {
        let families = if request.valid_families.is_empty() {
            Family::valid_for(request.kind).to_vec()
        } else {
            request.valid_families.to_vec()
        };

        let mut constraints = request.preferences.constraints.clone();
        for (dimension, value) in request.needed.iter() {
            if let Some(column) = capacity_column(dimension)
                && !constraints.iter().any(|c| c.column == column)
            {
                constraints.push(Constraint::at_least(column, value));
            }
        }

        CatalogFilter {
            region: request.region.to_string(),
            families,
            constraints,
        }
    }

    pub async fn select(&self, request: SelectRequest<'_>) -> Result<SelectOutcome, SelectError> {
        let filter = self.filter(&request);
        let candidates = self.catalog.find_entries(request.kind, &filter).await?;
        if candidates.is_empty() {
            return Err(SelectError::NoFeasibleConfiguration);
        }

        let mut best: Option<Selection> = None;
        let mut skipped = 0usize;

        for entry in candidates {
            let requested = request.needed.requested_spec(request.kind, entry.family);
            let quote = match self.pricing.price(&entry, &requested) {
                Ok(quote) => quote,
                Err(e) => {
                    tracing::warn!(
                        kind = %request.kind,
                        region = request.region,
                        entry_id = entry.id,
                        family = %entry.family,
                        error = %e,
                        "Skipping candidate that cannot be priced"
                    );
                    skipped += 1;
                    continue;
                }
            };
            // Strictly cheaper only: ties keep the earlier candidate.
            if best.as_ref().is_none_or(|b| quote.total < b.quote.total) {
                best = Some(Selection { entry, quote });
            }
        }

        metrics::record_candidates(request.kind.as_str(), best.is_some(), skipped);

        let Some(best) = best else {
            return Err(SelectError::AllCandidatesUnpriced { skipped });
        };

        tracing::debug!(
            kind = %request.kind,
            entry_id = best.entry.id,
            cost = best.quote.total,
            skipped,
            "Selected cheapest candidate"
        );

        match request.current_cost {
            Some(current) if request.preferences.exclude_upsizing && best.quote.total > current => {
                Ok(SelectOutcome::UpsizingExcluded(best))
            }
            _ => Ok(SelectOutcome::Selected(best)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(avg: f64, max: f64) -> UsageSummary {
        UsageSummary {
            avg: Some(avg),
            min: None,
            max: Some(max),
            last: Some(avg),
        }
    }

    #[test]
    fn test_needed_vcpu_matches_worked_example() {
        let current = ResourceSpec::new(CatalogKind::Instances, Family::Instance)
            .with(Dimension::Vcpu, 4.0);
        let usage = BTreeMap::from([(UsageKey::Cpu, summary(10.0, 95.0))]);

        let needed = needed_capacity(&current, &usage, &BreathingRoom::default());
        let vcpu = needed.get(Dimension::Vcpu).unwrap();
        assert!((vcpu - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_memory_uses_maximum_cpu_uses_average() {
        let current = ResourceSpec::new(CatalogKind::Instances, Family::Instance)
            .with(Dimension::Vcpu, 8.0)
            .with(Dimension::MemoryGib, 32.0);
        let usage = BTreeMap::from([
            (UsageKey::Cpu, summary(30.0, 90.0)),
            (UsageKey::Memory, summary(30.0, 60.0)),
        ]);

        let needed = needed_capacity(&current, &usage, &BreathingRoom::default());
        assert!((needed.get(Dimension::Vcpu).unwrap() - 4.0).abs() < 1e-9);
        assert!((needed.get(Dimension::MemoryGib).unwrap() - 25.6).abs() < 1e-9);
    }

    #[test]
    fn test_unmonitored_memory_has_no_floor() {
        let current = ResourceSpec::new(CatalogKind::Instances, Family::Instance)
            .with(Dimension::Vcpu, 4.0)
            .with(Dimension::MemoryGib, 16.0);
        let usage = BTreeMap::from([(UsageKey::Cpu, summary(10.0, 10.0))]);

        let needed = needed_capacity(&current, &usage, &BreathingRoom::default());
        assert_eq!(needed.get(Dimension::MemoryGib), None);
    }

    #[test]
    fn test_volume_size_never_shrinks_and_rates_scale() {
        let current = ResourceSpec::new(CatalogKind::Volumes, Family::Gp2)
            .with(Dimension::SizeGib, 500.0);
        let usage = BTreeMap::from([(UsageKey::Iops, summary(1000.0, 4000.0))]);
        let room = BreathingRoom::default().with_overrides(&BreathingRoomOverrides {
            iops: Some(50.0),
            ..Default::default()
        });

        let needed = needed_capacity(&current, &usage, &room);
        assert_eq!(needed.get(Dimension::SizeGib), Some(500.0));
        assert_eq!(needed.get(Dimension::Iops), Some(1500.0));
        assert_eq!(needed.get(Dimension::ThroughputMbps), None);
    }
}
