use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AggregationPolicy, Datapoint, Metric, ResourceSpec, UsageKey, UsageSummary};

/// Description used when an upsizing candidate was discarded.
pub const UPSIZING_EXCLUDED_DESCRIPTION: &str = "Upsizing excluded: the cheapest configuration that fits observed usage costs more than the current one.";

/// Description used when no catalog configuration fits the needed capacity.
pub const NO_FEASIBLE_DESCRIPTION: &str =
    "Current configuration retained: no cheaper alternative found.";

/// Per-request breathing-room overrides, in percent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BreathingRoomOverrides {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub network: Option<f64>,
    pub iops: Option<f64>,
    pub throughput: Option<f64>,
}

/// A sub-resource (e.g. an attached volume) rightsized alongside its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubResourceRequest {
    pub current: ResourceSpec,
    #[serde(default)]
    pub metrics: BTreeMap<Metric, Vec<Datapoint>>,
    #[serde(default)]
    pub preferences: BTreeMap<String, Option<String>>,
}

/// Input to the recommendation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub region: String,
    pub current: ResourceSpec,
    #[serde(default)]
    pub volumes: Vec<SubResourceRequest>,
    #[serde(default)]
    pub metrics: BTreeMap<Metric, Vec<Datapoint>>,
    /// Preference name to value. `null` or `""` keeps the current value.
    #[serde(default)]
    pub preferences: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub aggregation: Option<AggregationPolicy>,
    #[serde(default)]
    pub breathing_room: BreathingRoomOverrides,
}

/// A configuration together with its monthly cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricedSpec {
    pub spec: ResourceSpec,
    pub cost: f64,
    /// Itemised decomposition of `cost`.
    pub cost_breakdown: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationOutcome {
    /// A configuration was selected; it may equal the current one.
    Rightsized,
    /// Nothing in the catalog fits; the current configuration is kept.
    NoFeasibleConfiguration,
    /// The cheapest fit costs more and upsizing was excluded.
    UpsizingExcluded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub current: PricedSpec,
    pub recommended: PricedSpec,
    pub usage: BTreeMap<UsageKey, UsageSummary>,
    pub description: String,
    pub outcome: RecommendationOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Recommendation>,
}

impl Recommendation {
    /// Monthly saving of the recommendation; negative when it costs more.
    pub fn monthly_savings(&self) -> f64 {
        self.current.cost - self.recommended.cost
    }
}
