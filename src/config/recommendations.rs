use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::{models::AggregationPolicy, selector::BreathingRoom};

/// Recommendation defaults. Requests may override breathing room per
/// dimension and the aggregation policy.
///
/// ```toml
/// [recommendations]
/// default_aggregation = "maximum"
///
/// [recommendations.breathing_room]
/// cpu = 30
/// memory = 25
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommendationsConfig {
    /// Headroom added to observed usage, in percent per dimension.
    #[serde(default)]
    pub breathing_room: BreathingRoom,

    /// How datapoint series are summarised when a request does not say.
    #[serde(default)]
    pub default_aggregation: AggregationPolicy,
}

impl RecommendationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let room = &self.breathing_room;
        for (name, value) in [
            ("cpu", room.cpu),
            ("memory", room.memory),
            ("network", room.network),
            ("iops", room.iops),
            ("throughput", room.throughput),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "recommendations.breathing_room.{name} must be a non-negative percentage"
                )));
            }
        }
        Ok(())
    }
}
