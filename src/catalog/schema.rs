//! Declarative mapping from upstream price-list columns to catalog rows.
//!
//! Each catalog kind has a [`CatalogSchema`]: a list of upstream column names,
//! each with a typed setter and a required flag. A single generic loader
//! ([`CatalogSchema::load`]) applies the schema to a raw row, so supporting a
//! new upstream column only means adding an entry to the table below.

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{CatalogKind, CatalogRow, ChargeType, Family};

/// Why a raw upstream row could not be turned into a catalog row.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowError {
    #[error("Missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("Invalid value '{value}' for column '{column}': {reason}")]
    InvalidValue {
        column: &'static str,
        value: String,
        reason: String,
    },
}

type Setter = fn(&mut CatalogRow, &str) -> Result<(), String>;

/// One upstream column and how it lands on a [`CatalogRow`].
#[derive(Clone, Copy)]
pub struct ColumnMapping {
    pub name: &'static str,
    pub required: bool,
    set: Setter,
}

impl ColumnMapping {
    const fn required(name: &'static str, set: Setter) -> Self {
        Self {
            name,
            required: true,
            set,
        }
    }

    const fn optional(name: &'static str, set: Setter) -> Self {
        Self {
            name,
            required: false,
            set,
        }
    }
}

impl std::fmt::Debug for ColumnMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnMapping")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

const REGION: ColumnMapping = ColumnMapping::required("Region Code", |row, v| {
    row.region = v.to_string();
    Ok(())
});
const UNIT: ColumnMapping = ColumnMapping::required("Unit", |row, v| {
    let charge = ChargeType::parse(v).ok_or("unknown charge unit")?;
    row.charge_type = charge.as_str().to_string();
    Ok(())
});
const PRICE: ColumnMapping = ColumnMapping::required("PricePerUnit", |row, v| {
    let price = parse_number(v)?;
    if price < 0.0 {
        return Err("price is negative".to_string());
    }
    row.unit_price = price;
    Ok(())
});
const TIER: ColumnMapping = ColumnMapping::optional("Tier", |row, v| {
    let tier = v.parse::<i64>().map_err(|e| e.to_string())?;
    if tier < 1 {
        return Err("tiers are numbered from 1".to_string());
    }
    row.tier = Some(tier);
    Ok(())
});
const TIER_UPPER_BOUND: ColumnMapping = ColumnMapping::optional("Tier Upper Bound", |row, v| {
    row.tier_upper_bound = Some(parse_number(v)?);
    Ok(())
});
const MIN_SIZE: ColumnMapping = ColumnMapping::optional("Min Volume Size", |row, v| {
    row.min_size_gib = parse_quantity(v)?;
    Ok(())
});
const MAX_SIZE: ColumnMapping = ColumnMapping::optional("Max Volume Size", |row, v| {
    row.max_size_gib = parse_quantity(v)?;
    Ok(())
});
const MAX_IOPS: ColumnMapping = ColumnMapping::optional("Max IOPS/volume", |row, v| {
    row.max_iops = parse_quantity(v)?;
    Ok(())
});
const MAX_THROUGHPUT: ColumnMapping = ColumnMapping::optional("Max throughput/volume", |row, v| {
    row.max_throughput_mbps = parse_quantity(v)?;
    Ok(())
});
const VOLUME_FAMILY: ColumnMapping = ColumnMapping::required("Volume API Name", |row, v| {
    let family = Family::parse(v).ok_or("unknown volume type")?;
    row.family = family.as_str().to_string();
    Ok(())
});

const INSTANCE_COLUMNS: &[ColumnMapping] = &[
    ColumnMapping::required("Instance Type", |row, v| {
        row.instance_type = Some(v.to_string());
        Ok(())
    }),
    REGION,
    ColumnMapping::optional("vCPU", |row, v| {
        row.vcpu = parse_number(v)?;
        Ok(())
    }),
    ColumnMapping::optional("Memory", |row, v| {
        row.memory_gib = parse_quantity(v)?;
        Ok(())
    }),
    ColumnMapping::optional("Network Performance", |row, v| {
        row.network_mbps = parse_quantity(v)?;
        Ok(())
    }),
    ColumnMapping::optional("Processor Architecture", |row, v| {
        row.architecture = Some(v.to_ascii_lowercase());
        Ok(())
    }),
    ColumnMapping::optional("Burstable", |row, v| {
        row.burstable = parse_flag(v)?;
        Ok(())
    }),
    UNIT,
    PRICE,
];

const VOLUME_COLUMNS: &[ColumnMapping] = &[
    VOLUME_FAMILY,
    REGION,
    MIN_SIZE,
    MAX_SIZE,
    MAX_IOPS,
    MAX_THROUGHPUT,
    UNIT,
    PRICE,
    TIER,
    TIER_UPPER_BOUND,
];

const DB_STORAGE_COLUMNS: &[ColumnMapping] = &[
    VOLUME_FAMILY,
    REGION,
    ColumnMapping::optional("Database Engine", |row, v| {
        row.engine = Some(v.to_ascii_lowercase());
        Ok(())
    }),
    MIN_SIZE,
    MAX_SIZE,
    MAX_IOPS,
    MAX_THROUGHPUT,
    UNIT,
    PRICE,
    TIER,
    TIER_UPPER_BOUND,
];

/// Column layout of one catalog kind's upstream data.
#[derive(Debug, Clone, Copy)]
pub struct CatalogSchema {
    kind: CatalogKind,
    columns: &'static [ColumnMapping],
}

impl CatalogSchema {
    pub fn for_kind(kind: CatalogKind) -> Self {
        let columns = match kind {
            CatalogKind::Instances => INSTANCE_COLUMNS,
            CatalogKind::Volumes => VOLUME_COLUMNS,
            CatalogKind::DbStorage => DB_STORAGE_COLUMNS,
        };
        Self { kind, columns }
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    pub fn columns(&self) -> &'static [ColumnMapping] {
        self.columns
    }

    /// Build a catalog row from a raw upstream row.
    ///
    /// Unmapped columns are ignored. Empty and `NA` cells count as missing:
    /// a missing or unparseable required column fails the row, a missing or
    /// unparseable optional one leaves the field at its zero value.
    pub fn load(&self, id: i64, raw: &HashMap<String, String>) -> Result<CatalogRow, RowError> {
        let mut row = CatalogRow {
            id,
            ..Default::default()
        };
        if self.kind == CatalogKind::Instances {
            row.family = Family::Instance.as_str().to_string();
        }

        for column in self.columns {
            let value = raw
                .get(column.name)
                .map(|v| v.trim())
                .filter(|v| !is_missing(v));
            match value {
                Some(value) => match (column.set)(&mut row, value) {
                    Ok(()) => {}
                    Err(reason) if column.required => {
                        return Err(RowError::InvalidValue {
                            column: column.name,
                            value: value.to_string(),
                            reason,
                        });
                    }
                    Err(reason) => {
                        tracing::debug!(
                            kind = %self.kind,
                            column = column.name,
                            value,
                            reason = %reason,
                            "Unparseable optional column, leaving it unset"
                        );
                    }
                },
                None if column.required => return Err(RowError::MissingColumn(column.name)),
                None => {}
            }
        }

        if let Some(family) = row.family()
            && !Family::valid_for(self.kind).contains(&family)
        {
            return Err(RowError::InvalidValue {
                column: VOLUME_FAMILY.name,
                value: row.family,
                reason: format!("not a {} family", self.kind),
            });
        }

        Ok(row)
    }
}

fn is_missing(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("na") || value.eq_ignore_ascii_case("n/a")
}

fn parse_number(value: &str) -> Result<f64, String> {
    let cleaned = value.replace(',', "");
    let number = cleaned
        .trim()
        .parse::<f64>()
        .map_err(|_| "not a number".to_string())?;
    if !number.is_finite() {
        return Err("not a finite number".to_string());
    }
    Ok(number)
}

/// Parse quantities as they appear in price-list exports: `16 GiB`, `16 TiB`,
/// `1,000 MiB/s`, `Up to 10 Gigabit`, `64000`. Sizes normalise to GiB,
/// throughput to MB/s and bandwidth to Mbps.
fn parse_quantity(value: &str) -> Result<f64, String> {
    let lower = value.trim().to_ascii_lowercase();
    let rest = lower.strip_prefix("up to").unwrap_or(&lower).trim();

    let split = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(rest.len());
    let (number, unit) = rest.split_at(split);
    let number = parse_number(number)?;

    let factor = match unit.trim() {
        "" | "gib" | "gb" | "mib/s" | "mbps" | "mb/s" | "megabit" | "iops" => 1.0,
        "tib" | "tb" | "gib/s" | "gb/s" => 1024.0,
        "gigabit" | "gbps" => 1000.0,
        other => return Err(format!("unknown unit '{other}'")),
    };
    Ok(number * factor)
}

fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err("expected yes or no".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_volume_row() {
        let row = CatalogSchema::for_kind(CatalogKind::Volumes)
            .load(
                7,
                &raw(&[
                    ("Volume API Name", "gp3"),
                    ("Region Code", "us-east-1"),
                    ("Max Volume Size", "16 TiB"),
                    ("Min Volume Size", "1 GiB"),
                    ("Max IOPS/volume", "16000"),
                    ("Max throughput/volume", "1,000 MiB/s"),
                    ("Unit", "GB-Mo"),
                    ("PricePerUnit", "0.08"),
                    ("SKU", "ignored"),
                ]),
            )
            .unwrap();

        assert_eq!(row.id, 7);
        assert_eq!(row.family, "gp3");
        assert_eq!(row.max_size_gib, 16384.0);
        assert_eq!(row.max_throughput_mbps, 1000.0);
        assert_eq!(row.charge_type, "per_gb_month");
        assert_eq!(row.unit_price, 0.08);
        assert_eq!(row.tier, None);
    }

    #[test]
    fn test_load_instance_row() {
        let row = CatalogSchema::for_kind(CatalogKind::Instances)
            .load(
                1,
                &raw(&[
                    ("Instance Type", "m5.large"),
                    ("Region Code", "us-east-1"),
                    ("vCPU", "2"),
                    ("Memory", "8 GiB"),
                    ("Network Performance", "Up to 10 Gigabit"),
                    ("Processor Architecture", "x86_64"),
                    ("Unit", "Hrs"),
                    ("PricePerUnit", "0.096"),
                ]),
            )
            .unwrap();

        assert_eq!(row.family, "instance");
        assert_eq!(row.instance_type.as_deref(), Some("m5.large"));
        assert_eq!(row.memory_gib, 8.0);
        assert_eq!(row.network_mbps, 10000.0);
        assert!(!row.burstable);
        assert_eq!(row.charge_type, "per_hour");
    }

    #[test]
    fn test_missing_optional_numeric_is_zero() {
        let row = CatalogSchema::for_kind(CatalogKind::Volumes)
            .load(
                1,
                &raw(&[
                    ("Volume API Name", "st1"),
                    ("Region Code", "us-east-1"),
                    ("Max IOPS/volume", "NA"),
                    ("Unit", "GB-Mo"),
                    ("PricePerUnit", "0.045"),
                ]),
            )
            .unwrap();
        assert_eq!(row.max_iops, 0.0);
        assert_eq!(row.max_size_gib, 0.0);
    }

    #[rstest]
    #[case::price("PricePerUnit")]
    #[case::region("Region Code")]
    #[case::family("Volume API Name")]
    #[case::unit("Unit")]
    fn test_missing_required_column(#[case] column: &'static str) {
        let mut row = raw(&[
            ("Volume API Name", "gp2"),
            ("Region Code", "us-east-1"),
            ("Unit", "GB-Mo"),
            ("PricePerUnit", "0.10"),
        ]);
        row.insert(column.to_string(), "".to_string());

        let err = CatalogSchema::for_kind(CatalogKind::Volumes)
            .load(1, &row)
            .unwrap_err();
        assert_eq!(err, RowError::MissingColumn(column));
    }

    #[rstest]
    #[case::price("PricePerUnit", "free")]
    #[case::negative_price("PricePerUnit", "-0.01")]
    #[case::unit("Unit", "per-fortnight")]
    fn test_invalid_value(#[case] column: &str, #[case] value: &str) {
        let mut row = raw(&[
            ("Volume API Name", "io2"),
            ("Region Code", "us-east-1"),
            ("Unit", "IOPS-Mo"),
            ("PricePerUnit", "0.065"),
        ]);
        row.insert(column.to_string(), value.to_string());

        let err = CatalogSchema::for_kind(CatalogKind::Volumes)
            .load(1, &row)
            .unwrap_err();
        assert!(matches!(err, RowError::InvalidValue { .. }), "{err:?}");
    }

    #[rstest]
    #[case::size("Max Volume Size", "16 furlongs")]
    #[case::iops("Max IOPS/volume", "Varies")]
    #[case::tier("Tier", "0")]
    fn test_invalid_optional_value_is_unset(#[case] column: &str, #[case] value: &str) {
        let mut row = raw(&[
            ("Volume API Name", "io2"),
            ("Region Code", "us-east-1"),
            ("Unit", "IOPS-Mo"),
            ("PricePerUnit", "0.065"),
        ]);
        row.insert(column.to_string(), value.to_string());

        let row = CatalogSchema::for_kind(CatalogKind::Volumes)
            .load(1, &row)
            .unwrap();
        assert_eq!(row.max_size_gib, 0.0);
        assert_eq!(row.max_iops, 0.0);
        assert_eq!(row.tier, None);
        assert_eq!(row.unit_price, 0.065);
    }

    #[test]
    fn test_descriptive_network_performance_keeps_row() {
        let row = CatalogSchema::for_kind(CatalogKind::Instances)
            .load(
                4,
                &raw(&[
                    ("Instance Type", "t2.medium"),
                    ("Region Code", "us-east-1"),
                    ("vCPU", "2"),
                    ("Memory", "4 GiB"),
                    ("Network Performance", "Low to Moderate"),
                    ("Unit", "Hrs"),
                    ("PricePerUnit", "0.0464"),
                ]),
            )
            .unwrap();

        assert_eq!(row.instance_type.as_deref(), Some("t2.medium"));
        assert_eq!(row.network_mbps, 0.0);
        assert_eq!(row.vcpu, 2.0);
        assert_eq!(row.unit_price, 0.0464);
    }

    #[test]
    fn test_family_outside_kind_rejected() {
        let err = CatalogSchema::for_kind(CatalogKind::Volumes)
            .load(
                1,
                &raw(&[
                    ("Volume API Name", "aurora"),
                    ("Region Code", "us-east-1"),
                    ("Unit", "GB-Mo"),
                    ("PricePerUnit", "0.10"),
                ]),
            )
            .unwrap_err();
        assert!(matches!(err, RowError::InvalidValue { column: "Volume API Name", .. }));
    }

    #[test]
    fn test_db_storage_engine_and_tier() {
        let row = CatalogSchema::for_kind(CatalogKind::DbStorage)
            .load(
                3,
                &raw(&[
                    ("Volume API Name", "io2"),
                    ("Region Code", "eu-west-1"),
                    ("Database Engine", "PostgreSQL"),
                    ("Unit", "IOPS-Mo"),
                    ("PricePerUnit", "0.119"),
                    ("Tier", "1"),
                ]),
            )
            .unwrap();
        assert_eq!(row.engine.as_deref(), Some("postgresql"));
        assert_eq!(row.tier, Some(1));
    }

    #[rstest]
    #[case("64000", 64000.0)]
    #[case("4 TiB", 4096.0)]
    #[case("250 MiB/s", 250.0)]
    #[case("25 Gigabit", 25000.0)]
    #[case("Up to 5 Gigabit", 5000.0)]
    fn test_parse_quantity(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(parse_quantity(input).unwrap(), expected);
    }
}
