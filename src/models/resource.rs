use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which catalog a resource is priced against.
///
/// Each kind is published through exactly one canonical read view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    /// Compute instances, priced per hour.
    Instances,
    /// Block-storage volumes attached to instances.
    Volumes,
    /// Storage backing a managed database.
    DbStorage,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 3] = [Self::Instances, Self::Volumes, Self::DbStorage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instances => "instances",
            Self::Volumes => "volumes",
            Self::DbStorage => "db_storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instances" => Some(Self::Instances),
            "volumes" => Some(Self::Volumes),
            "db_storage" => Some(Self::DbStorage),
            _ => None,
        }
    }

    /// Name of the canonical read view for this catalog.
    pub fn view_name(&self) -> &'static str {
        match self {
            Self::Instances => "instance_catalog",
            Self::Volumes => "volume_catalog",
            Self::DbStorage => "db_storage_catalog",
        }
    }

    /// Prefix shared by every versioned backing table of this catalog.
    pub fn table_prefix(&self) -> String {
        format!("{}_v_", self.view_name())
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource family: the purchasable product line a configuration belongs to.
///
/// The set is closed. How a family is billed depends on the catalog it is
/// priced in, see [`crate::pricing::TierModel::for_family`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    #[serde(rename = "instance")]
    Instance,
    #[serde(rename = "gp2")]
    Gp2,
    #[serde(rename = "gp3")]
    Gp3,
    #[serde(rename = "io1")]
    Io1,
    #[serde(rename = "io2")]
    Io2,
    #[serde(rename = "st1")]
    St1,
    #[serde(rename = "sc1")]
    Sc1,
    /// Previous-generation magnetic storage.
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "aurora")]
    Aurora,
    #[serde(rename = "aurora-iopt1")]
    AuroraIoOptimized,
}

impl Family {
    pub const ALL: [Family; 10] = [
        Self::Instance,
        Self::Gp2,
        Self::Gp3,
        Self::Io1,
        Self::Io2,
        Self::St1,
        Self::Sc1,
        Self::Standard,
        Self::Aurora,
        Self::AuroraIoOptimized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Gp2 => "gp2",
            Self::Gp3 => "gp3",
            Self::Io1 => "io1",
            Self::Io2 => "io2",
            Self::St1 => "st1",
            Self::Sc1 => "sc1",
            Self::Standard => "standard",
            Self::Aurora => "aurora",
            Self::AuroraIoOptimized => "aurora-iopt1",
        }
    }

    /// Parse a family tag. Accepts the provider's alternate spellings for
    /// magnetic and Aurora storage.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .or(match lower.as_str() {
                "magnetic" => Some(Self::Standard),
                "aurora:storageusage" | "aurora-standard" => Some(Self::Aurora),
                "aurora-iooptimized" | "aurora-io-optimized" => Some(Self::AuroraIoOptimized),
                _ => None,
            })
    }

    /// Families that may be recommended within a catalog kind.
    pub fn valid_for(kind: CatalogKind) -> &'static [Family] {
        match kind {
            CatalogKind::Instances => &[Family::Instance],
            CatalogKind::Volumes => &[
                Family::Gp2,
                Family::Gp3,
                Family::Io1,
                Family::Io2,
                Family::St1,
                Family::Sc1,
                Family::Standard,
            ],
            CatalogKind::DbStorage => &[
                Family::Gp2,
                Family::Gp3,
                Family::Io1,
                Family::Io2,
                Family::Standard,
                Family::Aurora,
                Family::AuroraIoOptimized,
            ],
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numeric dimension of a resource configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    SizeGib,
    Iops,
    ThroughputMbps,
    Vcpu,
    MemoryGib,
    NetworkMbps,
    /// IOPS included free with the configuration. Reported, never billed.
    BaselineIops,
    /// Throughput included free with the configuration. Reported, never billed.
    BaselineThroughputMbps,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SizeGib => "size_gib",
            Self::Iops => "iops",
            Self::ThroughputMbps => "throughput_mbps",
            Self::Vcpu => "vcpu",
            Self::MemoryGib => "memory_gib",
            Self::NetworkMbps => "network_mbps",
            Self::BaselineIops => "baseline_iops",
            Self::BaselineThroughputMbps => "baseline_throughput_mbps",
        }
    }
}

/// The configuration being priced: a family plus its dimension values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    pub kind: CatalogKind,
    pub family: Family,
    /// Instance type for compute resources (e.g. `m5.xlarge`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Database engine for managed-database storage (e.g. `postgres`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default)]
    pub dimensions: BTreeMap<Dimension, f64>,
}

impl ResourceSpec {
    pub fn new(kind: CatalogKind, family: Family) -> Self {
        Self {
            kind,
            family,
            instance_type: None,
            engine: None,
            dimensions: BTreeMap::new(),
        }
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn with(mut self, dimension: Dimension, value: f64) -> Self {
        self.dimensions.insert(dimension, value);
        self
    }

    pub fn get(&self, dimension: Dimension) -> Option<f64> {
        self.dimensions.get(&dimension).copied()
    }

    /// Value of a dimension, treating an absent dimension as zero.
    pub fn value(&self, dimension: Dimension) -> f64 {
        self.get(dimension).unwrap_or(0.0)
    }

    pub fn set(&mut self, dimension: Dimension, value: f64) {
        self.dimensions.insert(dimension, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_parse_aliases() {
        assert_eq!(Family::parse("GP3"), Some(Family::Gp3));
        assert_eq!(Family::parse("magnetic"), Some(Family::Standard));
        assert_eq!(Family::parse("aurora-iopt1"), Some(Family::AuroraIoOptimized));
        assert_eq!(Family::parse("floppy"), None);
    }

    #[test]
    fn test_family_serde_uses_provider_tags() {
        let json = serde_json::to_string(&Family::AuroraIoOptimized).unwrap();
        assert_eq!(json, "\"aurora-iopt1\"");
        let parsed: Family = serde_json::from_str("\"gp2\"").unwrap();
        assert_eq!(parsed, Family::Gp2);
    }

    #[test]
    fn test_table_prefix_derives_from_view() {
        assert_eq!(CatalogKind::Volumes.table_prefix(), "volume_catalog_v_");
        assert_eq!(CatalogKind::parse("db_storage"), Some(CatalogKind::DbStorage));
    }

    #[test]
    fn test_spec_builder() {
        let spec = ResourceSpec::new(CatalogKind::Volumes, Family::Gp3)
            .with(Dimension::SizeGib, 100.0)
            .with(Dimension::Iops, 3000.0);
        assert_eq!(spec.get(Dimension::SizeGib), Some(100.0));
        assert_eq!(spec.value(Dimension::ThroughputMbps), 0.0);
    }
}
