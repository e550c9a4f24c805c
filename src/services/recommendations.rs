//! Recommendation engine.
//!
//! Orchestrates one rightsizing request end to end:
//!
//! 1. validate the request
//! 2. look up and price the current configuration (its baseline entry)
//! 3. summarise the observed metrics
//! 4. derive the needed capacity and resolve preferences into constraints
//! 5. select the cheapest fitting candidate
//!
//! Attached volumes are rightsized independently with the same aggregation
//! policy and breathing room, and returned as nested recommendations.
//!
//! The engine never logs request or response bodies and performs no I/O
//! beyond catalog reads, so dropping a request future cancels it cleanly.

use std::{
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;

use crate::{
    config::RecommendationsConfig,
    db::{CatalogRepo, DbError},
    models::{
        AggregationPolicy, BreathingRoomOverrides, CatalogKind, Combinator, Datapoint, Dimension,
        Family, Metric, NO_FEASIBLE_DESCRIPTION, PricedSpec, PricingCatalogEntry, Recommendation,
        RecommendationOutcome, RecommendationRequest, ResourceSpec, SubResourceRequest,
        UPSIZING_EXCLUDED_DESCRIPTION, UsageKey, UsageSummary,
    },
    observability::metrics,
    preferences::{PreferenceTable, ResolveError, resolve},
    pricing::{PricingError, Quote, TieredPricingCalculator},
    selector::{
        CheapestFitSelector, NeededCapacity, SelectError, SelectOutcome, SelectRequest,
        needed_capacity,
    },
    usage::{merge, summarize},
};

#[derive(Debug, Error)]
pub enum RecommendError {
    /// The request is malformed. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The current configuration is not in the catalog.
    #[error("not found: {0}")]
    NotFound(String),

    /// Configurations fit the request but none of them can be priced.
    #[error("pricing unavailable: {0}")]
    PricingUnavailable(String),

    /// The catalog could not be read.
    #[error("catalog unavailable: {0}")]
    UpstreamUnavailable(#[source] DbError),
}

impl From<DbError> for RecommendError {
    fn from(e: DbError) -> Self {
        Self::UpstreamUnavailable(e)
    }
}

impl From<ResolveError> for RecommendError {
    fn from(e: ResolveError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

#[derive(Debug, Error)]
#[error("description generation failed: {0}")]
pub struct DescriptionError(pub String);

/// What a description is generated from.
#[derive(Debug, Clone, Copy)]
pub struct DescriptionContext<'a> {
    pub current: &'a PricedSpec,
    pub recommended: &'a PricedSpec,
    pub usage: &'a BTreeMap<UsageKey, UsageSummary>,
    pub needed: &'a NeededCapacity,
}

/// Produces the human-readable text of a rightsized recommendation.
///
/// The text is embedded verbatim. A failure leaves the description empty
/// instead of failing the recommendation.
#[async_trait]
pub trait DescriptionGenerator: Send + Sync {
    async fn describe(&self, context: DescriptionContext<'_>) -> Result<String, DescriptionError>;
}

/// Deterministic, template-based descriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateDescriptionGenerator;

#[async_trait]
impl DescriptionGenerator for TemplateDescriptionGenerator {
    async fn describe(&self, context: DescriptionContext<'_>) -> Result<String, DescriptionError> {
        let current = spec_label(&context.current.spec);
        let recommended = spec_label(&context.recommended.spec);
        let savings = context.current.cost - context.recommended.cost;

        let mut text = if context.current.spec == context.recommended.spec {
            format!("{current} is already the cheapest configuration that fits observed usage.")
        } else if savings >= 0.0 {
            format!("Move from {current} to {recommended} to save ${savings:.2}/month.")
        } else {
            format!(
                "Move from {current} to {recommended}; this costs ${:.2}/month more but fits observed usage.",
                -savings
            )
        };

        let observed: Vec<String> = context
            .usage
            .iter()
            .map(|(key, summary)| {
                let shown = summary.zero_filled();
                format!(
                    "{} avg {:.1} max {:.1}",
                    usage_label(*key),
                    shown.avg.unwrap_or_default(),
                    shown.max.unwrap_or_default()
                )
            })
            .collect();
        if !observed.is_empty() {
            text.push_str(&format!(" Observed: {}.", observed.join(", ")));
        }

        let needed: Vec<String> = context
            .needed
            .iter()
            .map(|(dimension, value)| format!("{} {value:.2}", dimension.as_str()))
            .collect();
        if !needed.is_empty() {
            text.push_str(&format!(" Needed: {}.", needed.join(", ")));
        }
        Ok(text)
    }
}

fn spec_label(spec: &ResourceSpec) -> String {
    match (&spec.instance_type, spec.get(Dimension::SizeGib)) {
        (Some(instance_type), _) => instance_type.clone(),
        (None, Some(size)) => format!("{} {size} GiB", spec.family),
        (None, None) => spec.family.to_string(),
    }
}

fn usage_label(key: UsageKey) -> &'static str {
    match key {
        UsageKey::Cpu => "cpu %",
        UsageKey::Memory => "memory %",
        UsageKey::Network => "network Mbps",
        UsageKey::Iops => "iops",
        UsageKey::Throughput => "throughput MB/s",
    }
}

/// One resource to rightsize; the top-level request or one of its volumes.
struct Target<'a> {
    region: &'a str,
    current: &'a ResourceSpec,
    metrics: &'a BTreeMap<Metric, Vec<Datapoint>>,
    preferences: &'a BTreeMap<String, Option<String>>,
    aggregation: AggregationPolicy,
    overrides: &'a BreathingRoomOverrides,
}

/// Rightsizing service. Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct RecommendationEngine {
    catalog: Arc<dyn CatalogRepo>,
    pricing: Arc<TieredPricingCalculator>,
    selector: CheapestFitSelector,
    preferences: Arc<PreferenceTable>,
    config: RecommendationsConfig,
    descriptions: Arc<dyn DescriptionGenerator>,
}

impl RecommendationEngine {
    pub fn new(catalog: Arc<dyn CatalogRepo>, config: RecommendationsConfig) -> Self {
        let pricing = Arc::new(TieredPricingCalculator::standard());
        Self {
            selector: CheapestFitSelector::new(Arc::clone(&catalog), Arc::clone(&pricing)),
            catalog,
            pricing,
            preferences: Arc::new(PreferenceTable::standard()),
            config,
            descriptions: Arc::new(TemplateDescriptionGenerator),
        }
    }

    pub fn with_description_generator(mut self, generator: Arc<dyn DescriptionGenerator>) -> Self {
        self.descriptions = generator;
        self
    }

    /// Rightsize a resource and its attached volumes.
    ///
    /// A panic anywhere in the computation is contained and reported as
    /// [`RecommendError::InvalidInput`] for this request only.
    #[tracing::instrument(skip_all, fields(kind = %request.current.kind, region = %request.region))]
    pub async fn recommend(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Recommendation, RecommendError> {
        let start = Instant::now();
        let result = match AssertUnwindSafe(self.recommend_request(request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("Recommendation computation panicked");
                Err(RecommendError::InvalidInput(
                    "recommendation could not be computed for this request".to_string(),
                ))
            }
        };

        let outcome = match &result {
            Ok(rec) => outcome_label(rec.outcome),
            Err(RecommendError::InvalidInput(_)) => "invalid_input",
            Err(RecommendError::NotFound(_)) => "not_found",
            Err(RecommendError::PricingUnavailable(_)) => "pricing_unavailable",
            Err(RecommendError::UpstreamUnavailable(_)) => "upstream_unavailable",
        };
        metrics::record_recommendation(
            request.current.kind.as_str(),
            outcome,
            start.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Recommendation failed");
        }
        result
    }

    async fn recommend_request(
        &self,
        request: &RecommendationRequest,
    ) -> Result<Recommendation, RecommendError> {
        let aggregation = request
            .aggregation
            .unwrap_or(self.config.default_aggregation);
        validate_overrides(&request.breathing_room)?;

        let mut recommendation = self
            .recommend_target(Target {
                region: &request.region,
                current: &request.current,
                metrics: &request.metrics,
                preferences: &request.preferences,
                aggregation,
                overrides: &request.breathing_room,
            })
            .await?;

        for (index, volume) in request.volumes.iter().enumerate() {
            if volume.current.kind == CatalogKind::Instances {
                return Err(RecommendError::InvalidInput(format!(
                    "volumes[{index}] must be a volume or database storage resource"
                )));
            }
            let nested = self
                .recommend_target(volume_target(request, volume, aggregation))
                .await?;
            recommendation.volumes.push(nested);
        }

        Ok(recommendation)
    }

    async fn recommend_target(&self, target: Target<'_>) -> Result<Recommendation, RecommendError> {
        validate_spec(target.region, target.current)?;

        let baseline = self
            .catalog
            .find_current(target.region, target.current)
            .await?
            .ok_or_else(|| {
                RecommendError::NotFound(format!(
                    "{} is not in the {} catalog for {}",
                    spec_label(target.current),
                    target.current.kind,
                    target.region
                ))
            })?;

        let current = with_baseline_capacity(target.current, &baseline);
        let current_quote = self.price_current(&baseline, &current)?;
        let current_priced = priced(&current_quote);

        let usage = usage_summaries(current.kind, target.metrics, target.aggregation);
        let room = self
            .config
            .breathing_room
            .with_overrides(target.overrides);
        let needed = needed_capacity(&current, &usage, &room);

        let preferences = with_engine_pinned(target.preferences, &current);
        let resolved = resolve(
            &preferences,
            &current,
            Some(&baseline),
            &needed,
            &self.preferences,
        )?;

        let selection = self
            .selector
            .select(SelectRequest {
                kind: current.kind,
                region: target.region,
                needed: &needed,
                preferences: &resolved,
                valid_families: &[],
                current_cost: Some(current_quote.total),
            })
            .await;

        let (recommended, outcome) = match selection {
            Ok(SelectOutcome::Selected(selection)) => {
                (priced(&selection.quote), RecommendationOutcome::Rightsized)
            }
            Ok(SelectOutcome::UpsizingExcluded(selection)) => {
                tracing::debug!(
                    cheapest = selection.quote.total,
                    current = current_quote.total,
                    "Cheapest fit is an upsize, keeping current configuration"
                );
                (
                    current_priced.clone(),
                    RecommendationOutcome::UpsizingExcluded,
                )
            }
            Err(SelectError::NoFeasibleConfiguration) => (
                current_priced.clone(),
                RecommendationOutcome::NoFeasibleConfiguration,
            ),
            Err(SelectError::AllCandidatesUnpriced { skipped }) => {
                tracing::warn!(skipped, "Every fitting candidate lacks price components");
                return Err(RecommendError::PricingUnavailable(format!(
                    "all {skipped} fitting {} candidates lack price components",
                    current.kind
                )));
            }
            Err(SelectError::Db(e)) => return Err(e.into()),
        };

        let description = match outcome {
            RecommendationOutcome::UpsizingExcluded => UPSIZING_EXCLUDED_DESCRIPTION.to_string(),
            RecommendationOutcome::NoFeasibleConfiguration => NO_FEASIBLE_DESCRIPTION.to_string(),
            RecommendationOutcome::Rightsized => {
                let context = DescriptionContext {
                    current: &current_priced,
                    recommended: &recommended,
                    usage: &usage,
                    needed: &needed,
                };
                match self.descriptions.describe(context).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "Description generation failed, leaving it empty");
                        String::new()
                    }
                }
            }
        };

        Ok(Recommendation {
            current: current_priced,
            recommended,
            usage,
            description,
            outcome,
            volumes: Vec::new(),
        })
    }

    fn price_current(
        &self,
        baseline: &PricingCatalogEntry,
        current: &ResourceSpec,
    ) -> Result<Quote, RecommendError> {
        self.pricing
            .price(baseline, current)
            .map_err(|e| match e {
                PricingError::InvalidSpec(msg) => RecommendError::InvalidInput(msg),
                other => RecommendError::NotFound(format!(
                    "current configuration cannot be priced: {other}"
                )),
            })
    }
}

fn volume_target<'a>(
    parent: &'a RecommendationRequest,
    volume: &'a SubResourceRequest,
    aggregation: AggregationPolicy,
) -> Target<'a> {
    Target {
        region: &parent.region,
        current: &volume.current,
        metrics: &volume.metrics,
        preferences: &volume.preferences,
        aggregation,
        overrides: &parent.breathing_room,
    }
}

fn outcome_label(outcome: RecommendationOutcome) -> &'static str {
    match outcome {
        RecommendationOutcome::Rightsized => "rightsized",
        RecommendationOutcome::NoFeasibleConfiguration => "no_feasible_configuration",
        RecommendationOutcome::UpsizingExcluded => "upsizing_excluded",
    }
}

fn priced(quote: &Quote) -> PricedSpec {
    PricedSpec {
        spec: quote.spec.clone(),
        cost: quote.total,
        cost_breakdown: quote.breakdown(),
    }
}

fn validate_spec(region: &str, spec: &ResourceSpec) -> Result<(), RecommendError> {
    if region.trim().is_empty() {
        return Err(RecommendError::InvalidInput("region is required".into()));
    }
    if !Family::valid_for(spec.kind).contains(&spec.family) {
        return Err(RecommendError::InvalidInput(format!(
            "family {} is not valid for {} resources",
            spec.family, spec.kind
        )));
    }
    for (dimension, value) in &spec.dimensions {
        if !value.is_finite() || *value < 0.0 {
            return Err(RecommendError::InvalidInput(format!(
                "{} must be a non-negative number",
                dimension.as_str()
            )));
        }
    }
    match spec.kind {
        CatalogKind::Instances if spec.instance_type.as_deref().is_none_or(str::is_empty) => Err(
            RecommendError::InvalidInput("instance_type is required for instances".into()),
        ),
        CatalogKind::Volumes | CatalogKind::DbStorage
            if spec.get(Dimension::SizeGib).is_none_or(|size| size <= 0.0) =>
        {
            Err(RecommendError::InvalidInput(format!(
                "size_gib is required for {} resources",
                spec.kind
            )))
        }
        _ => Ok(()),
    }
}

fn validate_overrides(overrides: &BreathingRoomOverrides) -> Result<(), RecommendError> {
    let values = [
        ("cpu", overrides.cpu),
        ("memory", overrides.memory),
        ("network", overrides.network),
        ("iops", overrides.iops),
        ("throughput", overrides.throughput),
    ];
    for (name, value) in values {
        if let Some(v) = value
            && (!v.is_finite() || v < 0.0)
        {
            return Err(RecommendError::InvalidInput(format!(
                "breathing_room.{name} must be a non-negative percentage"
            )));
        }
    }
    Ok(())
}

/// Fill compute capacity the caller left out from the baseline entry.
fn with_baseline_capacity(current: &ResourceSpec, baseline: &PricingCatalogEntry) -> ResourceSpec {
    let mut spec = current.clone();
    if spec.kind == CatalogKind::Instances {
        for (dimension, value) in [
            (Dimension::Vcpu, baseline.vcpu),
            (Dimension::MemoryGib, baseline.memory_gib),
            (Dimension::NetworkMbps, baseline.network_mbps),
        ] {
            if spec.get(dimension).is_none() && value > 0.0 {
                spec.set(dimension, value);
            }
        }
    }
    if spec.engine.is_none() {
        spec.engine = baseline.engine.clone();
    }
    spec
}

/// Database storage is only comparable within one engine: unless the caller
/// chose an engine, keep the current one.
fn with_engine_pinned(
    preferences: &BTreeMap<String, Option<String>>,
    current: &ResourceSpec,
) -> BTreeMap<String, Option<String>> {
    let mut preferences = preferences.clone();
    if current.kind == CatalogKind::DbStorage
        && current.engine.is_some()
        && !preferences.keys().any(|k| k.eq_ignore_ascii_case("Engine"))
    {
        preferences.insert("Engine".to_string(), None);
    }
    preferences
}

/// Summaries of the metrics that size `kind`. Directional metrics are
/// summed before summarising; a metric without data produces no entry.
fn usage_summaries(
    kind: CatalogKind,
    series: &BTreeMap<Metric, Vec<Datapoint>>,
    policy: AggregationPolicy,
) -> BTreeMap<UsageKey, UsageSummary> {
    let get = |metric: Metric| series.get(&metric).map(Vec::as_slice).unwrap_or_default();
    let combined = |a: Metric, b: Metric| merge(get(a), get(b), Combinator::Sum);

    let inputs: Vec<(UsageKey, Vec<Datapoint>)> = match kind {
        CatalogKind::Instances => vec![
            (UsageKey::Cpu, get(Metric::CpuUtilization).to_vec()),
            (UsageKey::Memory, get(Metric::MemoryUtilization).to_vec()),
            (UsageKey::Network, combined(Metric::NetworkIn, Metric::NetworkOut)),
        ],
        CatalogKind::Volumes | CatalogKind::DbStorage => vec![
            (UsageKey::Iops, combined(Metric::ReadIops, Metric::WriteIops)),
            (
                UsageKey::Throughput,
                combined(Metric::ReadThroughput, Metric::WriteThroughput),
            ),
        ],
    };

    inputs
        .into_iter()
        .map(|(key, points)| (key, summarize(&points, policy)))
        .filter(|(_, summary)| !summary.is_empty())
        .collect()
}
