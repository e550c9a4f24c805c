use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single time-stamped observation.
///
/// Every statistic is optional: providers only return the statistics that
/// were requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<f64>,
}

impl Datapoint {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Datapoint with average, minimum and maximum all set to `value`.
    pub fn uniform(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            average: Some(value),
            minimum: Some(value),
            maximum: Some(value),
            ..Default::default()
        }
    }
}

/// Summary statistics over a series. A field is `None` when no datapoint
/// carried the statistic it is derived from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageSummary {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub last: Option<f64>,
}

impl UsageSummary {
    /// True when no statistic could be computed.
    pub fn is_empty(&self) -> bool {
        self.avg.is_none() && self.min.is_none() && self.max.is_none() && self.last.is_none()
    }

    /// Copy with absent fields shown as zero. For display only.
    pub fn zero_filled(&self) -> Self {
        Self {
            avg: Some(self.avg.unwrap_or(0.0)),
            min: Some(self.min.unwrap_or(0.0)),
            max: Some(self.max.unwrap_or(0.0)),
            last: Some(self.last.unwrap_or(0.0)),
        }
    }
}

/// Which datapoint statistic a summary is computed from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// `avg` from average statistics, `min` from minimums, `max` from maximums.
    #[default]
    Average,
    /// Every field from the maximum statistic.
    Maximum,
    /// Every field from the minimum statistic.
    Minimum,
    /// Every field from the sum statistic.
    Sum,
}

/// How overlapping datapoints of two series are combined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// Additive quantities, e.g. read + write IOPS.
    Sum,
    /// Redundant reports of the same quantity.
    Average,
}

/// Observed metrics the engine understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Percent of vCPU capacity.
    CpuUtilization,
    /// Percent of memory capacity.
    MemoryUtilization,
    /// Mbps.
    NetworkIn,
    /// Mbps.
    NetworkOut,
    ReadIops,
    WriteIops,
    /// MB/s.
    ReadThroughput,
    /// MB/s.
    WriteThroughput,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuUtilization => "cpu_utilization",
            Self::MemoryUtilization => "memory_utilization",
            Self::NetworkIn => "network_in",
            Self::NetworkOut => "network_out",
            Self::ReadIops => "read_iops",
            Self::WriteIops => "write_iops",
            Self::ReadThroughput => "read_throughput",
            Self::WriteThroughput => "write_throughput",
        }
    }
}

/// Usage summaries keyed by the dimension they size. Combined metrics
/// (network in+out, read+write) appear under their merged name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum UsageKey {
    Cpu,
    Memory,
    Network,
    Iops,
    Throughput,
}
