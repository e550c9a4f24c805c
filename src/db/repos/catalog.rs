use async_trait::async_trait;

use crate::{
    db::error::{DbError, DbResult},
    models::{
        CatalogColumn, CatalogKind, CatalogRow, ColumnType, ColumnValue, Family,
        PricingCatalogEntry, ResourceSpec,
    },
    preferences::{Comparator, Constraint},
};

/// Columns read from a catalog view, in select order.
pub const CATALOG_COLUMNS: &str = "id, family, region, engine, instance_type, architecture, \
     burstable, vcpu, memory_gib, network_mbps, min_size_gib, max_size_gib, max_iops, \
     max_throughput_mbps, charge_type, unit_price, tier, tier_upper_bound";

/// Which catalog rows a query selects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogFilter {
    pub region: String,
    /// Empty means any family.
    pub families: Vec<Family>,
    pub constraints: Vec<Constraint>,
}

impl CatalogFilter {
    /// Filter matching the catalog entry a resource is currently running as.
    pub fn for_current(region: &str, current: &ResourceSpec) -> Self {
        let mut constraints = Vec::new();
        if let Some(instance_type) = &current.instance_type {
            constraints.push(Constraint::new(
                CatalogColumn::InstanceType,
                Comparator::Eq,
                ColumnValue::Text(instance_type.clone()),
            ));
        }
        if current.kind == CatalogKind::DbStorage
            && let Some(engine) = &current.engine
        {
            constraints.push(Constraint::new(
                CatalogColumn::Engine,
                Comparator::Eq,
                ColumnValue::Text(engine.clone()),
            ));
        }
        Self {
            region: region.to_string(),
            families: vec![current.family],
            constraints,
        }
    }

    /// Render the filter as a `WHERE` clause with positional placeholders.
    ///
    /// `placeholder(n)` returns the dialect's marker for the n-th (1-based)
    /// bind. Column names only ever come from [`CatalogColumn`].
    pub fn render(&self, placeholder: impl Fn(usize) -> String) -> DbResult<WhereClause> {
        let mut binds: Vec<BindValue> = Vec::new();
        let next = |value: BindValue, binds: &mut Vec<BindValue>| {
            binds.push(value);
            placeholder(binds.len())
        };

        let mut clauses = vec![format!(
            "region = {}",
            next(BindValue::Text(self.region.clone()), &mut binds)
        )];

        if !self.families.is_empty() {
            let markers: Vec<String> = self
                .families
                .iter()
                .map(|f| next(BindValue::Text(f.as_str().to_string()), &mut binds))
                .collect();
            clauses.push(format!("family IN ({})", markers.join(", ")));
        }

        for constraint in &self.constraints {
            let column = constraint.column.as_sql();
            let clause = match (constraint.comparator, &constraint.value) {
                (Comparator::In, ColumnValue::TextSet(values)) if !values.is_empty() => {
                    let markers: Vec<String> = values
                        .iter()
                        .map(|v| next(BindValue::Text(v.clone()), &mut binds))
                        .collect();
                    format!("{column} IN ({})", markers.join(", "))
                }
                (Comparator::In, _) => {
                    return Err(DbError::Validation(format!(
                        "{column} IN requires a non-empty list"
                    )));
                }
                (comparator, value) => {
                    let bind = BindValue::for_column(constraint.column, value)?;
                    format!("{column} {} {}", comparator.as_sql(), next(bind, &mut binds))
                }
            };
            clauses.push(clause);
        }

        Ok(WhereClause {
            sql: format!("WHERE {}", clauses.join(" AND ")),
            binds,
        })
    }
}

/// A rendered `WHERE` clause and its bind values, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl BindValue {
    fn for_column(column: CatalogColumn, value: &ColumnValue) -> DbResult<Self> {
        match (column.value_type(), value) {
            (ColumnType::Text, ColumnValue::Text(s)) => Ok(Self::Text(s.clone())),
            (ColumnType::Number, ColumnValue::Number(n)) => Ok(Self::Number(*n)),
            (ColumnType::Bool, ColumnValue::Bool(b)) => Ok(Self::Bool(*b)),
            _ => Err(DbError::Validation(format!(
                "value {value:?} does not match the type of column {}",
                column.as_sql()
            ))),
        }
    }
}

/// Read access to the published catalogs.
///
/// Every read goes through the catalog's canonical view, never a versioned table.
#[async_trait]
pub trait CatalogRepo: Send + Sync {
    /// Rows matching `filter`, ordered by row id.
    async fn find_rows(&self, kind: CatalogKind, filter: &CatalogFilter)
    -> DbResult<Vec<CatalogRow>>;

    /// Number of rows currently published.
    async fn count(&self, kind: CatalogKind) -> DbResult<i64>;

    /// Entries matching `filter`, ordered by lowest row id.
    async fn find_entries(
        &self,
        kind: CatalogKind,
        filter: &CatalogFilter,
    ) -> DbResult<Vec<PricingCatalogEntry>> {
        let rows = self.find_rows(kind, filter).await?;
        Ok(PricingCatalogEntry::group(kind, rows))
    }

    /// The catalog entry `current` is running as, if the catalog has it.
    async fn find_current(
        &self,
        region: &str,
        current: &ResourceSpec,
    ) -> DbResult<Option<PricingCatalogEntry>> {
        let filter = CatalogFilter::for_current(region, current);
        let entries = self.find_entries(current.kind, &filter).await?;
        Ok(entries.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(_: usize) -> String {
        "?".to_string()
    }

    fn dollar(n: usize) -> String {
        format!("${n}")
    }

    #[test]
    fn test_render_numbers_placeholders_in_bind_order() {
        let filter = CatalogFilter {
            region: "eu-west-1".to_string(),
            families: vec![Family::Gp3, Family::Io2],
            constraints: vec![
                Constraint::at_least(CatalogColumn::MaxIops, 4000.0),
                Constraint::new(
                    CatalogColumn::Family,
                    Comparator::In,
                    ColumnValue::TextSet(vec!["gp3".to_string()]),
                ),
            ],
        };

        let clause = filter.render(dollar).unwrap();
        assert_eq!(
            clause.sql,
            "WHERE region = $1 AND family IN ($2, $3) AND max_iops >= $4 AND family IN ($5)"
        );
        assert_eq!(clause.binds.len(), 5);
        assert_eq!(clause.binds[3], BindValue::Number(4000.0));

        let sqlite = filter.render(question).unwrap();
        assert!(sqlite.sql.starts_with("WHERE region = ? AND family IN (?, ?)"));
    }

    #[test]
    fn test_render_keeps_hostile_values_out_of_sql() {
        let filter = CatalogFilter {
            region: "x'; DROP TABLE catalog_versions; --".to_string(),
            families: vec![],
            constraints: vec![Constraint::new(
                CatalogColumn::InstanceType,
                Comparator::Like,
                ColumnValue::Text("m5.%' OR 1=1 --".to_string()),
            )],
        };
        let clause = filter.render(question).unwrap();
        assert_eq!(clause.sql, "WHERE region = ? AND instance_type LIKE ?");
    }

    #[test]
    fn test_render_rejects_type_mismatch() {
        let filter = CatalogFilter {
            region: "us-east-1".to_string(),
            families: vec![],
            constraints: vec![Constraint::new(
                CatalogColumn::Vcpu,
                Comparator::Gte,
                ColumnValue::Text("four".to_string()),
            )],
        };
        assert!(matches!(filter.render(question), Err(DbError::Validation(_))));
    }

    #[test]
    fn test_for_current_pins_instance_type_and_engine() {
        let spec = ResourceSpec::new(CatalogKind::DbStorage, Family::Gp3).with_engine("postgres");
        let filter = CatalogFilter::for_current("us-east-1", &spec);
        assert_eq!(filter.families, vec![Family::Gp3]);
        assert_eq!(filter.constraints.len(), 1);
        assert_eq!(filter.constraints[0].column, CatalogColumn::Engine);
    }
}
