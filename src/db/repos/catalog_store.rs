use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::{DbError, DbResult},
    models::{CatalogKind, CatalogRow, CatalogVersion},
};

/// Name of a versioned backing table: the catalog's view name, `_v_`, and a
/// suffix of lowercase ASCII letters, digits and underscores.
///
/// Table names are spliced into DDL, so the only way to obtain one is through
/// [`VersionedTableName::generate`] or the validating [`VersionedTableName::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionedTableName {
    kind: CatalogKind,
    name: String,
}

impl VersionedTableName {
    /// A fresh, collision-free table name. UUIDv7 suffixes also sort by
    /// creation time.
    pub fn generate(kind: CatalogKind) -> Self {
        Self {
            kind,
            name: format!("{}{}", kind.table_prefix(), Uuid::now_v7().simple()),
        }
    }

    pub fn parse(kind: CatalogKind, name: &str) -> DbResult<Self> {
        let suffix = name.strip_prefix(&kind.table_prefix()).ok_or_else(|| {
            DbError::Validation(format!("{name} is not a versioned {kind} table"))
        })?;
        let valid = !suffix.is_empty()
            && suffix
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        if !valid {
            return Err(DbError::Validation(format!(
                "invalid versioned table name {name}"
            )));
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }

    pub fn kind(&self) -> CatalogKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for VersionedTableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Write side of the catalogs: versioned tables and the view pointer.
///
/// Only the refresh pipeline uses this.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// The table the catalog's view currently reads from.
    async fn current_version(&self, kind: CatalogKind) -> DbResult<Option<CatalogVersion>>;

    /// Create an empty table with the catalog schema.
    async fn create_table(&self, table: &VersionedTableName) -> DbResult<()>;

    /// Append rows to a table that is not yet published. Returns rows written.
    async fn insert_rows(&self, table: &VersionedTableName, rows: &[CatalogRow]) -> DbResult<u64>;

    /// Atomically repoint the catalog's view at `table` and record the new
    /// version. On failure nothing changes.
    async fn swap_view(
        &self,
        table: &VersionedTableName,
        row_count: i64,
        skipped_rows: i64,
    ) -> DbResult<CatalogVersion>;

    /// Every versioned table of the catalog, published or not.
    async fn list_versioned_tables(&self, kind: CatalogKind)
    -> DbResult<Vec<VersionedTableName>>;

    async fn drop_table(&self, table: &VersionedTableName) -> DbResult<()>;
}

/// Column definitions shared by both dialects; only the type names differ.
pub(crate) struct ColumnTypes {
    pub integer: &'static str,
    pub real: &'static str,
    pub boolean: &'static str,
    pub boolean_false: &'static str,
}

/// DDL for a versioned catalog table.
pub(crate) fn create_table_sql(table: &VersionedTableName, types: &ColumnTypes) -> String {
    let ColumnTypes {
        integer,
        real,
        boolean,
        boolean_false,
    } = types;
    format!(
        r#"
        CREATE TABLE "{table}" (
            id {integer} PRIMARY KEY,
            family TEXT NOT NULL,
            region TEXT NOT NULL,
            engine TEXT,
            instance_type TEXT,
            architecture TEXT,
            burstable {boolean} NOT NULL DEFAULT {boolean_false},
            vcpu {real} NOT NULL DEFAULT 0,
            memory_gib {real} NOT NULL DEFAULT 0,
            network_mbps {real} NOT NULL DEFAULT 0,
            min_size_gib {real} NOT NULL DEFAULT 0,
            max_size_gib {real} NOT NULL DEFAULT 0,
            max_iops {real} NOT NULL DEFAULT 0,
            max_throughput_mbps {real} NOT NULL DEFAULT 0,
            charge_type TEXT NOT NULL,
            unit_price {real} NOT NULL,
            tier {integer},
            tier_upper_bound {real}
        )
        "#
    )
}

pub(crate) fn create_index_sql(table: &VersionedTableName) -> String {
    format!(r#"CREATE INDEX "idx_{table}_region_family" ON "{table}" (region, family)"#)
}
