use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CatalogKind, Family};

/// What a price component charges for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChargeType {
    /// Instance-hours.
    PerHour,
    /// Provisioned storage per GiB-month.
    PerGbMonth,
    /// Provisioned IOPS per IOPS-month.
    PerIopsMonth,
    /// Provisioned throughput per MB/s-month.
    PerMbpsMonth,
    /// Metered I/O requests per million.
    PerMillionOps,
}

impl ChargeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerHour => "per_hour",
            Self::PerGbMonth => "per_gb_month",
            Self::PerIopsMonth => "per_iops_month",
            Self::PerMbpsMonth => "per_mbps_month",
            Self::PerMillionOps => "per_million_ops",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_hour" | "hrs" | "hours" => Some(Self::PerHour),
            "per_gb_month" | "gb-mo" | "gb-month" => Some(Self::PerGbMonth),
            "per_iops_month" | "iops-mo" | "iops-month" => Some(Self::PerIopsMonth),
            "per_mbps_month" | "mibps-mo" | "mbps-mo" | "gibps-mo" => Some(Self::PerMbpsMonth),
            "per_million_ops" | "ios" | "million i/o" | "io requests" => Some(Self::PerMillionOps),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChargeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single persisted catalog row: one price component of one purchasable
/// configuration, together with that configuration's capacity bounds.
///
/// Rows are immutable once published; a refresh replaces the whole table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogRow {
    /// Position of the row in the upstream data; gives candidates a stable order.
    pub id: i64,
    pub family: String,
    pub region: String,
    pub engine: Option<String>,
    pub instance_type: Option<String>,
    pub architecture: Option<String>,
    pub burstable: bool,
    pub vcpu: f64,
    pub memory_gib: f64,
    pub network_mbps: f64,
    pub min_size_gib: f64,
    pub max_size_gib: f64,
    pub max_iops: f64,
    pub max_throughput_mbps: f64,
    pub charge_type: String,
    pub unit_price: f64,
    pub tier: Option<i64>,
    pub tier_upper_bound: Option<f64>,
}

impl CatalogRow {
    pub fn family(&self) -> Option<Family> {
        Family::parse(&self.family)
    }

    pub fn charge(&self) -> Option<ChargeType> {
        ChargeType::parse(&self.charge_type)
    }
}

/// Columns of the catalog that may appear in a query constraint.
///
/// Column names in generated SQL only ever come from this enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CatalogColumn {
    Family,
    Region,
    Engine,
    InstanceType,
    Architecture,
    Burstable,
    Vcpu,
    MemoryGib,
    NetworkMbps,
    MaxSizeGib,
    MaxIops,
    MaxThroughputMbps,
}

impl CatalogColumn {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Family => "family",
            Self::Region => "region",
            Self::Engine => "engine",
            Self::InstanceType => "instance_type",
            Self::Architecture => "architecture",
            Self::Burstable => "burstable",
            Self::Vcpu => "vcpu",
            Self::MemoryGib => "memory_gib",
            Self::NetworkMbps => "network_mbps",
            Self::MaxSizeGib => "max_size_gib",
            Self::MaxIops => "max_iops",
            Self::MaxThroughputMbps => "max_throughput_mbps",
        }
    }

    pub fn value_type(&self) -> ColumnType {
        match self {
            Self::Family
            | Self::Region
            | Self::Engine
            | Self::InstanceType
            | Self::Architecture => ColumnType::Text,
            Self::Burstable => ColumnType::Bool,
            Self::Vcpu
            | Self::MemoryGib
            | Self::NetworkMbps
            | Self::MaxSizeGib
            | Self::MaxIops
            | Self::MaxThroughputMbps => ColumnType::Number,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Number,
    Bool,
}

/// A typed value compared against a catalog column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ColumnValue {
    Number(f64),
    Bool(bool),
    Text(String),
    TextSet(Vec<String>),
}

impl ColumnValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A price component of a catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceComponent {
    pub charge: ChargeType,
    pub unit_price: f64,
    /// 1-based tier index for tiered charges.
    pub tier: Option<i64>,
    pub tier_upper_bound: Option<f64>,
}

/// One purchasable configuration in a region, with all its price components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingCatalogEntry {
    /// Lowest row id among the entry's components.
    pub id: i64,
    pub kind: CatalogKind,
    pub family: Family,
    pub region: String,
    pub engine: Option<String>,
    pub instance_type: Option<String>,
    pub architecture: Option<String>,
    pub burstable: bool,
    pub vcpu: f64,
    pub memory_gib: f64,
    pub network_mbps: f64,
    pub min_size_gib: f64,
    pub max_size_gib: f64,
    pub max_iops: f64,
    pub max_throughput_mbps: f64,
    pub components: Vec<PriceComponent>,
}

/// `(family, region, engine, instance_type)`
type EntryKey = (Family, String, Option<String>, Option<String>);

impl PricingCatalogEntry {
    /// Group rows into entries keyed by `(family, region, engine, instance_type)`.
    ///
    /// Output is ordered by each entry's lowest row id. Rows whose family or
    /// charge type cannot be parsed are dropped.
    pub fn group(kind: CatalogKind, rows: Vec<CatalogRow>) -> Vec<PricingCatalogEntry> {
        let mut rows = rows;
        rows.sort_by_key(|r| r.id);

        let mut entries: Vec<PricingCatalogEntry> = Vec::new();
        let mut index: HashMap<EntryKey, usize> = HashMap::new();
        for row in rows {
            let (Some(family), Some(charge)) = (row.family(), row.charge()) else {
                tracing::debug!(row_id = row.id, family = %row.family, charge = %row.charge_type, "Ignoring unrecognised catalog row");
                continue;
            };
            let component = PriceComponent {
                charge,
                unit_price: row.unit_price,
                tier: row.tier,
                tier_upper_bound: row.tier_upper_bound,
            };

            let key = (
                family,
                row.region.clone(),
                row.engine.clone(),
                row.instance_type.clone(),
            );
            if let Some(&i) = index.get(&key) {
                entries[i].components.push(component);
                continue;
            }

            index.insert(key, entries.len());
            entries.push(PricingCatalogEntry {
                id: row.id,
                kind,
                family,
                region: row.region,
                engine: row.engine,
                instance_type: row.instance_type,
                architecture: row.architecture,
                burstable: row.burstable,
                vcpu: row.vcpu,
                memory_gib: row.memory_gib,
                network_mbps: row.network_mbps,
                min_size_gib: row.min_size_gib,
                max_size_gib: row.max_size_gib,
                max_iops: row.max_iops,
                max_throughput_mbps: row.max_throughput_mbps,
                components: vec![component],
            });
        }
        entries
    }

    pub fn component(&self, charge: ChargeType) -> Option<&PriceComponent> {
        self.components.iter().find(|c| c.charge == charge)
    }

    /// The lowest-priced component of a charge type.
    pub fn cheapest_component(&self, charge: ChargeType) -> Option<&PriceComponent> {
        self.components
            .iter()
            .filter(|c| c.charge == charge)
            .min_by(|a, b| a.unit_price.total_cmp(&b.unit_price))
    }

    pub fn tier_component(&self, charge: ChargeType, tier: i64) -> Option<&PriceComponent> {
        self.components
            .iter()
            .find(|c| c.charge == charge && c.tier.unwrap_or(1) == tier)
    }

    /// Read a column off the entry, for "keep current value" preferences.
    pub fn column_value(&self, column: CatalogColumn) -> Option<ColumnValue> {
        match column {
            CatalogColumn::Family => Some(ColumnValue::Text(self.family.as_str().to_string())),
            CatalogColumn::Region => Some(ColumnValue::Text(self.region.clone())),
            CatalogColumn::Engine => self.engine.clone().map(ColumnValue::Text),
            CatalogColumn::InstanceType => self.instance_type.clone().map(ColumnValue::Text),
            CatalogColumn::Architecture => self.architecture.clone().map(ColumnValue::Text),
            CatalogColumn::Burstable => Some(ColumnValue::Bool(self.burstable)),
            CatalogColumn::Vcpu => Some(ColumnValue::Number(self.vcpu)),
            CatalogColumn::MemoryGib => Some(ColumnValue::Number(self.memory_gib)),
            CatalogColumn::NetworkMbps => Some(ColumnValue::Number(self.network_mbps)),
            CatalogColumn::MaxSizeGib => Some(ColumnValue::Number(self.max_size_gib)),
            CatalogColumn::MaxIops => Some(ColumnValue::Number(self.max_iops)),
            CatalogColumn::MaxThroughputMbps => {
                Some(ColumnValue::Number(self.max_throughput_mbps))
            }
        }
    }
}

/// The persisted pointer to the table a catalog view currently reads from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogVersion {
    pub kind: CatalogKind,
    pub table_name: String,
    pub refreshed_at: DateTime<Utc>,
    pub row_count: i64,
    pub skipped_rows: i64,
}
