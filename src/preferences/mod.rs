//! Preference resolution: user preferences to typed catalog constraints.
//!
//! Preferences arrive as a loose `name -> optional value` map. The
//! [`PreferenceTable`] maps each known name to a catalog column and a
//! comparator; resolution turns the map into [`Constraint`]s that the storage
//! layer renders with bound parameters. Nothing user-supplied is ever
//! interpolated into SQL.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::{
    models::{
        CatalogColumn, CatalogKind, ColumnType, ColumnValue, Dimension, Family,
        PricingCatalogEntry, ResourceSpec,
    },
    selector::NeededCapacity,
};

pub const EXCLUDE_BURSTABLE: &str = "ExcludeBurstableFeature";
pub const EXCLUDE_UPSIZING: &str = "ExcludeUpsizingFeature";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("invalid value {value:?} for preference {preference}: {reason}")]
    InvalidValue {
        preference: String,
        value: String,
        reason: String,
    },
}

/// How a constraint compares a catalog column to its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Gte,
    /// SQL `LIKE` pattern match.
    Like,
    /// Membership in a set of text values.
    In,
}

impl Comparator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

/// A single typed predicate over a catalog column.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub column: CatalogColumn,
    pub comparator: Comparator,
    pub value: ColumnValue,
}

impl Constraint {
    pub fn new(column: CatalogColumn, comparator: Comparator, value: ColumnValue) -> Self {
        Self {
            column,
            comparator,
            value,
        }
    }

    pub fn at_least(column: CatalogColumn, value: f64) -> Self {
        Self::new(column, Comparator::Gte, ColumnValue::Number(value))
    }
}

/// What a preference does once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceAction {
    /// Constrain a catalog column. `sizing` names the dimension the column
    /// bounds; when the preference is absent, the needed capacity for that
    /// dimension becomes the floor instead.
    Column {
        column: CatalogColumn,
        comparator: Comparator,
        sizing: Option<Dimension>,
    },
    /// Restrict instances to non-burstable types.
    ExcludeBurstable,
    /// Withhold recommendations that cost more than the current configuration.
    ExcludeUpsizing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceRule {
    pub name: &'static str,
    pub action: PreferenceAction,
    pub applies_to: &'static [CatalogKind],
}

impl PreferenceRule {
    pub fn applies(&self, kind: CatalogKind) -> bool {
        self.applies_to.contains(&kind)
    }
}

const INSTANCES: &[CatalogKind] = &[CatalogKind::Instances];
const STORAGE: &[CatalogKind] = &[CatalogKind::Volumes, CatalogKind::DbStorage];
const DB_STORAGE: &[CatalogKind] = &[CatalogKind::DbStorage];
const ALL: &[CatalogKind] = &CatalogKind::ALL;

/// Preference name to column mapping. Built once at startup and shared.
#[derive(Debug, Clone)]
pub struct PreferenceTable {
    rules: HashMap<String, PreferenceRule>,
}

impl Default for PreferenceTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PreferenceTable {
    pub fn standard() -> Self {
        use CatalogColumn as C;
        use Comparator::*;

        let column = |column, comparator, sizing| PreferenceAction::Column {
            column,
            comparator,
            sizing,
        };
        let rules = [
            ("Architecture", column(C::Architecture, Eq, None), INSTANCES),
            ("InstanceFamily", column(C::InstanceType, Like, None), INSTANCES),
            ("vCPU", column(C::Vcpu, Gte, Some(Dimension::Vcpu)), INSTANCES),
            ("Memory", column(C::MemoryGib, Gte, Some(Dimension::MemoryGib)), INSTANCES),
            ("Network", column(C::NetworkMbps, Gte, Some(Dimension::NetworkMbps)), INSTANCES),
            ("VolumeType", column(C::Family, In, None), STORAGE),
            ("IOPS", column(C::MaxIops, Gte, Some(Dimension::Iops)), STORAGE),
            (
                "Throughput",
                column(C::MaxThroughputMbps, Gte, Some(Dimension::ThroughputMbps)),
                STORAGE,
            ),
            ("Engine", column(C::Engine, Eq, None), DB_STORAGE),
            (EXCLUDE_BURSTABLE, PreferenceAction::ExcludeBurstable, INSTANCES),
            (EXCLUDE_UPSIZING, PreferenceAction::ExcludeUpsizing, ALL),
        ];

        Self {
            rules: rules
                .into_iter()
                .map(|(name, action, applies_to)| {
                    (
                        name.to_ascii_lowercase(),
                        PreferenceRule {
                            name,
                            action,
                            applies_to,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Look up a rule by preference name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&PreferenceRule> {
        self.rules.get(&name.trim().to_ascii_lowercase())
    }

    /// Sizing rules for a catalog kind, in a stable order.
    fn sizing_rules(&self, kind: CatalogKind) -> Vec<(CatalogColumn, Dimension)> {
        let mut out: Vec<_> = self
            .rules
            .values()
            .filter(|r| r.applies(kind))
            .filter_map(|r| match r.action {
                PreferenceAction::Column {
                    column,
                    sizing: Some(dimension),
                    ..
                } => Some((column, dimension)),
                _ => None,
            })
            .collect();
        out.sort_by_key(|(_, d)| *d);
        out
    }
}

/// Resolved preferences for one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPreferences {
    pub constraints: Vec<Constraint>,
    pub exclude_burstable: bool,
    pub exclude_upsizing: bool,
}

impl ResolvedPreferences {
    pub fn constrains(&self, column: CatalogColumn) -> bool {
        self.constraints.iter().any(|c| c.column == column)
    }
}

/// Resolve a preference map for `current` into typed constraints.
///
/// - absent key: no constraint, except that sizing columns fall back to the
///   floor in `needed`
/// - key with empty value: the column is pinned to the value read off
///   `current` (or, for columns the spec does not carry, its catalog entry)
/// - key with a value: the value, coerced to the column's type
///
/// Unknown names and names that do not apply to this kind are ignored.
pub fn resolve(
    preferences: &BTreeMap<String, Option<String>>,
    current: &ResourceSpec,
    baseline: Option<&PricingCatalogEntry>,
    needed: &NeededCapacity,
    table: &PreferenceTable,
) -> Result<ResolvedPreferences, ResolveError> {
    let mut resolved = ResolvedPreferences::default();

    for (name, value) in preferences {
        let Some(rule) = table.get(name) else {
            tracing::debug!(preference = %name, "Ignoring unknown preference");
            continue;
        };
        if !rule.applies(current.kind) {
            tracing::debug!(preference = rule.name, kind = %current.kind, "Preference does not apply to this resource kind");
            continue;
        }
        let value = value.as_deref().map(str::trim).filter(|v| !v.is_empty());

        match rule.action {
            PreferenceAction::ExcludeBurstable => {
                if feature_enabled(value) {
                    resolved.exclude_burstable = true;
                    resolved.constraints.push(Constraint::new(
                        CatalogColumn::Burstable,
                        Comparator::Eq,
                        ColumnValue::Bool(false),
                    ));
                }
            }
            PreferenceAction::ExcludeUpsizing => {
                resolved.exclude_upsizing = feature_enabled(value);
            }
            PreferenceAction::Column {
                column,
                comparator,
                ..
            } => {
                let resolved_value = match value {
                    Some(raw) => coerce(rule, column, comparator, raw)?,
                    None => match current_value(column, comparator, current, baseline) {
                        Some(v) => v,
                        None => {
                            tracing::debug!(preference = rule.name, "Current value unknown, preference imposes no constraint");
                            continue;
                        }
                    },
                };
                resolved
                    .constraints
                    .push(Constraint::new(column, comparator, resolved_value));
            }
        }
    }

    for (column, dimension) in table.sizing_rules(current.kind) {
        if resolved.constrains(column) {
            continue;
        }
        if let Some(floor) = needed.get(dimension) {
            resolved.constraints.push(Constraint::at_least(column, floor));
        }
    }

    Ok(resolved)
}

/// A feature flag is on when present, unless explicitly switched off.
fn feature_enabled(value: Option<&str>) -> bool {
    match value {
        None => true,
        Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "no" | "false" | "0" | "off"),
    }
}

fn coerce(
    rule: &PreferenceRule,
    column: CatalogColumn,
    comparator: Comparator,
    raw: &str,
) -> Result<ColumnValue, ResolveError> {
    let invalid = |reason: &str| ResolveError::InvalidValue {
        preference: rule.name.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    match (column.value_type(), comparator) {
        (ColumnType::Number, _) => match raw.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => Ok(ColumnValue::Number(n)),
            _ => Err(invalid("expected a non-negative number")),
        },
        (ColumnType::Bool, _) => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(ColumnValue::Bool(true)),
            "false" | "no" | "0" => Ok(ColumnValue::Bool(false)),
            _ => Err(invalid("expected yes or no")),
        },
        (ColumnType::Text, Comparator::Like) => Ok(ColumnValue::Text(family_pattern(raw))),
        (ColumnType::Text, Comparator::In) => {
            let mut values = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                values.push(canonical_text(column, part).ok_or_else(|| invalid("unknown value"))?);
            }
            if values.is_empty() {
                return Err(invalid("expected a comma separated list"));
            }
            Ok(ColumnValue::TextSet(values))
        }
        (ColumnType::Text, _) => canonical_text(column, raw)
            .map(ColumnValue::Text)
            .ok_or_else(|| invalid("unknown value")),
    }
}

/// Normalise a text value for a column. Family tags are validated.
fn canonical_text(column: CatalogColumn, raw: &str) -> Option<String> {
    match column {
        CatalogColumn::Family => Family::parse(raw).map(|f| f.as_str().to_string()),
        _ => Some(raw.to_string()),
    }
}

/// `m5` and `m5.` both become the pattern `m5.%`.
fn family_pattern(family: &str) -> String {
    format!("{}.%", family.trim_end_matches('.'))
}

/// The value of `column` on the current resource.
fn current_value(
    column: CatalogColumn,
    comparator: Comparator,
    current: &ResourceSpec,
    baseline: Option<&PricingCatalogEntry>,
) -> Option<ColumnValue> {
    let from_spec = match column {
        CatalogColumn::Family => Some(ColumnValue::Text(current.family.as_str().to_string())),
        CatalogColumn::Engine => current.engine.clone().map(ColumnValue::Text),
        CatalogColumn::InstanceType => current.instance_type.clone().map(ColumnValue::Text),
        CatalogColumn::Vcpu => current.get(Dimension::Vcpu).map(ColumnValue::Number),
        CatalogColumn::MemoryGib => current.get(Dimension::MemoryGib).map(ColumnValue::Number),
        CatalogColumn::NetworkMbps => current.get(Dimension::NetworkMbps).map(ColumnValue::Number),
        CatalogColumn::MaxIops => current.get(Dimension::Iops).map(ColumnValue::Number),
        CatalogColumn::MaxThroughputMbps => {
            current.get(Dimension::ThroughputMbps).map(ColumnValue::Number)
        }
        CatalogColumn::MaxSizeGib => current.get(Dimension::SizeGib).map(ColumnValue::Number),
        CatalogColumn::Region | CatalogColumn::Architecture | CatalogColumn::Burstable => None,
    };
    let value = from_spec.or_else(|| baseline.and_then(|b| b.column_value(column)))?;

    // Shape the raw field for the comparator it will be used with.
    Some(match (comparator, value) {
        (Comparator::Like, ColumnValue::Text(instance_type)) => {
            let family = instance_type
                .split_once('.')
                .map(|(f, _)| f)
                .unwrap_or(&instance_type);
            ColumnValue::Text(family_pattern(family))
        }
        (Comparator::In, ColumnValue::Text(text)) => ColumnValue::TextSet(vec![text]),
        (_, value) => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogKind;

    fn prefs(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    fn instance() -> ResourceSpec {
        ResourceSpec::new(CatalogKind::Instances, Family::Instance)
            .with_instance_type("m5.xlarge")
            .with(Dimension::Vcpu, 4.0)
            .with(Dimension::MemoryGib, 16.0)
    }

    fn find(resolved: &ResolvedPreferences, column: CatalogColumn) -> Option<&Constraint> {
        resolved.constraints.iter().find(|c| c.column == column)
    }

    #[test]
    fn test_empty_value_keeps_current() {
        let table = PreferenceTable::standard();
        let resolved = resolve(
            &prefs(&[("vCPU", None), ("InstanceFamily", Some(""))]),
            &instance(),
            None,
            &NeededCapacity::default(),
            &table,
        )
        .unwrap();

        assert_eq!(
            find(&resolved, CatalogColumn::Vcpu).unwrap().value,
            ColumnValue::Number(4.0)
        );
        assert_eq!(
            find(&resolved, CatalogColumn::InstanceType).unwrap().value,
            ColumnValue::Text("m5.%".to_string())
        );
    }

    #[test]
    fn test_empty_value_reads_baseline_for_columns_not_on_spec() {
        let table = PreferenceTable::standard();
        let mut baseline = crate::pricing::tests::entry(CatalogKind::Instances, Family::Instance, &[]);
        baseline.architecture = Some("arm64".to_string());

        let resolved = resolve(
            &prefs(&[("Architecture", None)]),
            &instance(),
            Some(&baseline),
            &NeededCapacity::default(),
            &table,
        )
        .unwrap();
        assert_eq!(
            find(&resolved, CatalogColumn::Architecture).unwrap().value,
            ColumnValue::Text("arm64".to_string())
        );
    }

    #[test]
    fn test_absent_sizing_preference_defaults_to_needed() {
        let table = PreferenceTable::standard();
        let needed = NeededCapacity::default().with(Dimension::Vcpu, 1.2);

        let resolved = resolve(&prefs(&[]), &instance(), None, &needed, &table).unwrap();
        assert_eq!(resolved.constraints, vec![Constraint::at_least(CatalogColumn::Vcpu, 1.2)]);
    }

    #[test]
    fn test_explicit_value_overrides_needed_floor() {
        let table = PreferenceTable::standard();
        let needed = NeededCapacity::default().with(Dimension::Vcpu, 1.2);

        let resolved = resolve(&prefs(&[("vCPU", Some("8"))]), &instance(), None, &needed, &table)
            .unwrap();
        assert_eq!(resolved.constraints, vec![Constraint::at_least(CatalogColumn::Vcpu, 8.0)]);
    }

    #[test]
    fn test_unknown_and_inapplicable_keys_ignored() {
        let table = PreferenceTable::standard();
        let resolved = resolve(
            &prefs(&[("FavouriteColour", Some("blue")), ("VolumeType", Some("gp3"))]),
            &instance(),
            None,
            &NeededCapacity::default(),
            &table,
        )
        .unwrap();
        assert!(resolved.constraints.is_empty());
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let table = PreferenceTable::standard();
        let err = resolve(
            &prefs(&[("Memory", Some("lots"))]),
            &instance(),
            None,
            &NeededCapacity::default(),
            &table,
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidValue { preference, .. } if preference == "Memory"));
    }

    #[test]
    fn test_volume_type_list_is_canonicalised() {
        let table = PreferenceTable::standard();
        let volume = ResourceSpec::new(CatalogKind::Volumes, Family::Gp2).with(Dimension::SizeGib, 100.0);
        let resolved = resolve(
            &prefs(&[("VolumeType", Some("GP3, io2"))]),
            &volume,
            None,
            &NeededCapacity::default(),
            &table,
        )
        .unwrap();
        assert_eq!(
            find(&resolved, CatalogColumn::Family).unwrap().value,
            ColumnValue::TextSet(vec!["gp3".to_string(), "io2".to_string()])
        );

        let err = resolve(
            &prefs(&[("VolumeType", Some("gp3,floppy"))]),
            &volume,
            None,
            &NeededCapacity::default(),
            &table,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_feature_flags() {
        let table = PreferenceTable::standard();
        let resolved = resolve(
            &prefs(&[(EXCLUDE_BURSTABLE, Some("Yes")), (EXCLUDE_UPSIZING, None)]),
            &instance(),
            None,
            &NeededCapacity::default(),
            &table,
        )
        .unwrap();
        assert!(resolved.exclude_burstable);
        assert!(resolved.exclude_upsizing);
        assert_eq!(
            find(&resolved, CatalogColumn::Burstable).unwrap().value,
            ColumnValue::Bool(false)
        );

        let off = resolve(
            &prefs(&[(EXCLUDE_UPSIZING, Some("no"))]),
            &instance(),
            None,
            &NeededCapacity::default(),
            &table,
        )
        .unwrap();
        assert!(!off.exclude_upsizing);
    }

    #[test]
    fn test_lookup_ignores_case() {
        let table = PreferenceTable::standard();
        assert_eq!(table.get("vcpu").unwrap().name, "vCPU");
        assert_eq!(table.get(" excludeupsizingfeature ").unwrap().name, EXCLUDE_UPSIZING);
    }
}
