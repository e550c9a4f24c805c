//! Tiered monthly cost calculation per resource family.
//!
//! Every family is billed under one [`TierModel`]. The calculator normalises
//! the requested configuration against the catalog entry (minimum purchasable
//! size, sizes needed to sustain requested IOPS, included baselines) before
//! pricing it, so the returned spec is exactly what the quote prices.
//!
//! Costs are monthly, in the catalog's currency.

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{
    CatalogKind, ChargeType, Dimension, Family, PricingCatalogEntry, ResourceSpec,
};

/// Billing hours in a month.
pub const HOURS_PER_MONTH: f64 = 730.0;

/// Seconds in a billing month.
pub const SECONDS_PER_MONTH: f64 = HOURS_PER_MONTH * 3600.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PricingError {
    #[error("price component not found for {family}/{region}/{charge}{}", tier.map(|t| format!(" tier {t}")).unwrap_or_default())]
    ComponentUnavailable {
        family: Family,
        region: String,
        charge: ChargeType,
        tier: Option<i64>,
    },

    #[error("family {family} is not priced in the {kind} catalog")]
    UnsupportedFamily { kind: CatalogKind, family: Family },

    #[error("invalid specification: {0}")]
    InvalidSpec(String),
}

/// Included allowance of a base-allowance family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allowance {
    pub iops: f64,
    pub throughput_mbps: f64,
}

/// How a family is billed.
#[derive(Debug, Clone, PartialEq)]
pub enum TierModel {
    /// Instance-hours.
    Hourly,
    /// Size only. When `iops_per_gib` is set, performance scales with size:
    /// the size is raised to sustain the requested IOPS and the resulting
    /// baseline is reported, never billed.
    FlatRate {
        iops_per_gib: Option<f64>,
        min_iops: f64,
    },
    /// Size plus provisioned IOPS charged in tiers. `breakpoints` are the
    /// ascending upper bounds of every tier but the last.
    IopsTiered {
        breakpoints: &'static [f64],
        max_iops_per_gib: f64,
    },
    /// Size plus IOPS/throughput above an included allowance.
    BaseAllowance {
        allowance: Allowance,
        /// From this size on, `large_allowance` replaces `allowance`.
        large_volume: Option<(f64, Allowance)>,
        max_iops_per_gib: f64,
    },
    /// Size plus I/O requests metered per million.
    PerOperation,
    /// Size only; I/O is included.
    IoOptimized,
}

impl TierModel {
    /// The billing model of a family within a catalog, or `None` when the
    /// family is not sold there.
    pub fn for_family(kind: CatalogKind, family: Family) -> Option<TierModel> {
        use CatalogKind::*;
        use Family::*;

        let model = match (kind, family) {
            (Instances, Instance) => TierModel::Hourly,
            (Volumes | DbStorage, Gp2) => TierModel::FlatRate {
                iops_per_gib: Some(3.0),
                min_iops: 100.0,
            },
            (Volumes, St1 | Sc1) => TierModel::FlatRate {
                iops_per_gib: None,
                min_iops: 0.0,
            },
            (Volumes | DbStorage, Io1) => TierModel::IopsTiered {
                breakpoints: &[],
                max_iops_per_gib: 50.0,
            },
            (Volumes, Io2) => TierModel::IopsTiered {
                breakpoints: &[32_000.0, 64_000.0],
                max_iops_per_gib: 500.0,
            },
            (DbStorage, Io2) => TierModel::IopsTiered {
                breakpoints: &[],
                max_iops_per_gib: 500.0,
            },
            (Volumes, Gp3) => TierModel::BaseAllowance {
                allowance: Allowance {
                    iops: 3000.0,
                    throughput_mbps: 125.0,
                },
                large_volume: None,
                max_iops_per_gib: 500.0,
            },
            (DbStorage, Gp3) => TierModel::BaseAllowance {
                allowance: Allowance {
                    iops: 3000.0,
                    throughput_mbps: 125.0,
                },
                large_volume: Some((
                    400.0,
                    Allowance {
                        iops: 12_000.0,
                        throughput_mbps: 500.0,
                    },
                )),
                max_iops_per_gib: 500.0,
            },
            (Volumes | DbStorage, Standard) | (DbStorage, Aurora) => TierModel::PerOperation,
            (DbStorage, AuroraIoOptimized) => TierModel::IoOptimized,
            _ => return None,
        };
        Some(model)
    }
}

/// One itemised charge of a quote.
#[derive(Debug, Clone, PartialEq)]
pub struct CostLine {
    pub label: String,
    pub quantity: f64,
    pub unit: &'static str,
    pub unit_price: f64,
    pub amount: f64,
}

impl CostLine {
    fn new(label: impl Into<String>, quantity: f64, unit: &'static str, unit_price: f64) -> Self {
        Self {
            label: label.into(),
            quantity,
            unit,
            unit_price,
            amount: quantity * unit_price,
        }
    }
}

impl std::fmt::Display for CostLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} {} x ${} = ${}",
            self.label, self.quantity, self.unit, self.unit_price, self.amount
        )
    }
}

/// The priced configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// The configuration as priced, after minimum-size and baseline adjustments.
    pub spec: ResourceSpec,
    pub total: f64,
    /// Non-zero charges in order: size, IOPS by tier descending, throughput.
    pub lines: Vec<CostLine>,
}

impl Quote {
    fn from_lines(spec: ResourceSpec, lines: Vec<CostLine>) -> Self {
        let lines: Vec<CostLine> = lines.into_iter().filter(|l| l.amount != 0.0).collect();
        let total = lines.iter().map(|l| l.amount).sum();
        Self { spec, total, lines }
    }

    /// Human-readable decomposition; the `= $x` amounts add up to `total`.
    pub fn breakdown(&self) -> String {
        if self.lines.is_empty() {
            return "no charges".to_string();
        }
        self.lines
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Prices candidate configurations against catalog entries.
///
/// The tier table is built once and shared by reference.
#[derive(Debug, Clone)]
pub struct TieredPricingCalculator {
    models: HashMap<(CatalogKind, Family), TierModel>,
}

impl Default for TieredPricingCalculator {
    fn default() -> Self {
        Self::standard()
    }
}

impl TieredPricingCalculator {
    /// Calculator with the tier model of every family the catalogs sell.
    pub fn standard() -> Self {
        let mut models = HashMap::new();
        for kind in CatalogKind::ALL {
            for family in Family::ALL {
                if let Some(model) = TierModel::for_family(kind, family) {
                    models.insert((kind, family), model);
                }
            }
        }
        Self { models }
    }

    pub fn tier_model(&self, kind: CatalogKind, family: Family) -> Option<&TierModel> {
        self.models.get(&(kind, family))
    }

    /// Price `requested` as a configuration of `entry`.
    ///
    /// Dimensions missing from `requested` are taken as zero. A missing price
    /// component for a charge the family bills is an error, never a zero charge.
    pub fn price(
        &self,
        entry: &PricingCatalogEntry,
        requested: &ResourceSpec,
    ) -> Result<Quote, PricingError> {
        let model = self
            .tier_model(entry.kind, entry.family)
            .ok_or(PricingError::UnsupportedFamily {
                kind: entry.kind,
                family: entry.family,
            })?;

        for (dimension, value) in &requested.dimensions {
            if !value.is_finite() || *value < 0.0 {
                return Err(PricingError::InvalidSpec(format!(
                    "{} must be a non-negative number, got {}",
                    dimension.as_str(),
                    value
                )));
            }
        }

        let mut spec = ResourceSpec::new(entry.kind, entry.family);
        spec.instance_type = entry.instance_type.clone();
        spec.engine = entry.engine.clone().or_else(|| requested.engine.clone());

        let rate = |charge: ChargeType| -> Result<f64, PricingError> {
            entry
                .component(charge)
                .map(|c| c.unit_price)
                .ok_or_else(|| missing(entry, charge, None))
        };

        let lines = match model {
            TierModel::Hourly => {
                spec.set(Dimension::Vcpu, entry.vcpu);
                spec.set(Dimension::MemoryGib, entry.memory_gib);
                spec.set(Dimension::NetworkMbps, entry.network_mbps);
                let label = match &entry.instance_type {
                    Some(t) => format!("compute {t}"),
                    None => "compute".to_string(),
                };
                vec![CostLine::new(
                    label,
                    HOURS_PER_MONTH,
                    "h",
                    rate(ChargeType::PerHour)?,
                )]
            }
            TierModel::FlatRate {
                iops_per_gib,
                min_iops,
            } => {
                let iops = requested.value(Dimension::Iops);
                let mut size = base_size(entry, requested);
                if let Some(ratio) = iops_per_gib {
                    size = size.max((iops / ratio).ceil());
                    let baseline = (size * ratio).max(*min_iops);
                    let baseline = if entry.max_iops > 0.0 {
                        baseline.min(entry.max_iops)
                    } else {
                        baseline
                    };
                    spec.set(Dimension::Iops, baseline);
                    spec.set(Dimension::BaselineIops, baseline);
                }
                spec.set(Dimension::SizeGib, size);
                vec![size_line(size, rate(ChargeType::PerGbMonth)?)]
            }
            TierModel::IopsTiered {
                breakpoints,
                max_iops_per_gib,
            } => {
                let iops = requested.value(Dimension::Iops);
                let size = base_size(entry, requested).max((iops / max_iops_per_gib).ceil());
                spec.set(Dimension::SizeGib, size);
                spec.set(Dimension::Iops, iops);

                let mut lines = vec![size_line(size, rate(ChargeType::PerGbMonth)?)];
                lines.extend(tiered_iops_lines(entry, iops, breakpoints)?);
                lines
            }
            TierModel::BaseAllowance {
                allowance,
                large_volume,
                max_iops_per_gib,
            } => {
                let requested_iops = requested.value(Dimension::Iops);
                let size =
                    base_size(entry, requested).max((requested_iops / max_iops_per_gib).ceil());
                let allowance = match large_volume {
                    Some((threshold, large)) if size >= *threshold => *large,
                    _ => *allowance,
                };
                let iops = requested_iops.max(allowance.iops);
                let throughput = requested
                    .value(Dimension::ThroughputMbps)
                    .max(allowance.throughput_mbps);

                spec.set(Dimension::SizeGib, size);
                spec.set(Dimension::Iops, iops);
                spec.set(Dimension::ThroughputMbps, throughput);
                spec.set(Dimension::BaselineIops, allowance.iops);
                spec.set(Dimension::BaselineThroughputMbps, allowance.throughput_mbps);

                vec![
                    size_line(size, rate(ChargeType::PerGbMonth)?),
                    CostLine::new(
                        "iops above baseline",
                        iops - allowance.iops,
                        "IOPS",
                        rate(ChargeType::PerIopsMonth)?,
                    ),
                    CostLine::new(
                        "throughput above baseline",
                        throughput - allowance.throughput_mbps,
                        "MB/s",
                        rate(ChargeType::PerMbpsMonth)?,
                    ),
                ]
            }
            TierModel::PerOperation => {
                let size = base_size(entry, requested);
                let iops = requested.value(Dimension::Iops);
                spec.set(Dimension::SizeGib, size);
                spec.set(Dimension::Iops, iops);

                let per_million = entry
                    .cheapest_component(ChargeType::PerMillionOps)
                    .map(|c| c.unit_price)
                    .ok_or_else(|| missing(entry, ChargeType::PerMillionOps, None))?;
                vec![
                    size_line(size, rate(ChargeType::PerGbMonth)?),
                    CostLine::new(
                        "io requests",
                        million_ops_per_month(iops),
                        "M ops",
                        per_million,
                    ),
                ]
            }
            TierModel::IoOptimized => {
                let size = base_size(entry, requested);
                spec.set(Dimension::SizeGib, size);
                vec![size_line(size, rate(ChargeType::PerGbMonth)?)]
            }
        };

        Ok(Quote::from_lines(spec, lines))
    }
}

/// Millions of I/O operations billed for a month at a sustained IOPS rate.
pub fn million_ops_per_month(iops: f64) -> f64 {
    (iops * SECONDS_PER_MONTH / 1_000_000.0).ceil()
}

/// Requested size in whole GiB, raised to the entry's minimum purchasable size.
fn base_size(entry: &PricingCatalogEntry, requested: &ResourceSpec) -> f64 {
    requested
        .value(Dimension::SizeGib)
        .ceil()
        .max(entry.min_size_gib)
}

fn size_line(size: f64, unit_price: f64) -> CostLine {
    CostLine::new("size", size, "GiB", unit_price)
}

fn missing(entry: &PricingCatalogEntry, charge: ChargeType, tier: Option<i64>) -> PricingError {
    PricingError::ComponentUnavailable {
        family: entry.family,
        region: entry.region.clone(),
        charge,
        tier,
    }
}

/// IOPS charges for each tier the quantity reaches, highest tier first.
///
/// Tier `i` covers `(breakpoints[i-2], breakpoints[i-1]]`, the last tier is
/// unbounded above. Tier 1 must always be priced.
fn tiered_iops_lines(
    entry: &PricingCatalogEntry,
    iops: f64,
    breakpoints: &[f64],
) -> Result<Vec<CostLine>, PricingError> {
    let tier_count = breakpoints.len() + 1;
    let mut lines = Vec::with_capacity(tier_count);

    for index in (0..tier_count).rev() {
        let lower = if index == 0 { 0.0 } else { breakpoints[index - 1] };
        let upper = breakpoints.get(index).copied().unwrap_or(f64::INFINITY);
        let quantity = (iops.min(upper) - lower).max(0.0);
        let tier = index as i64 + 1;

        if quantity == 0.0 && tier != 1 {
            continue;
        }
        let unit_price = entry
            .tier_component(ChargeType::PerIopsMonth, tier)
            .map(|c| c.unit_price)
            .ok_or_else(|| missing(entry, ChargeType::PerIopsMonth, Some(tier)))?;

        let label = if tier_count == 1 {
            "iops".to_string()
        } else {
            format!("iops tier {tier}")
        };
        lines.push(CostLine::new(label, quantity, "IOPS", unit_price));
    }
    Ok(lines)
}
